use std::{error::Error, fmt, io};

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, CommErr>;

/// Failures of a collective operation.
///
/// Every variant is fatal to the whole group: once a collective fails the ranks can no longer
/// be assumed to be in lockstep.
#[derive(Debug)]
pub enum CommErr {
    Io(io::Error),
    /// A rank contributed an array whose length differs from the others.
    ShapeMismatch {
        rank: usize,
        got: usize,
        expected: usize,
    },
    UnexpectedMessage {
        got: &'static str,
    },
    Rendezvous(String),
    /// A peer reported a failure of its own.
    Remote(String),
}

impl fmt::Display for CommErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommErr::Io(e) => write!(f, "io error: {e}"),
            CommErr::ShapeMismatch {
                rank,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch in collective: rank {rank} contributed {got} elements, expected {expected}"
            ),
            CommErr::UnexpectedMessage { got } => write!(f, "unexpected message: got {got}"),
            CommErr::Rendezvous(detail) => write!(f, "rendezvous failed: {detail}"),
            CommErr::Remote(detail) => write!(f, "peer failure: {detail}"),
        }
    }
}

impl Error for CommErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CommErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
