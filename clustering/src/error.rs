use std::{
    error::Error,
    fmt::{self, Display},
};

use comms::CommErr;

/// The result type used in the entire clustering module.
pub type Result<T> = std::result::Result<T, KMeansErr>;

/// The clustering module's error type.
///
/// None of these are recoverable by a single rank: a failure on one rank means the group is no
/// longer in lockstep and the whole run has to stop.
#[derive(Debug)]
pub enum KMeansErr {
    InvalidConfig(String),
    InvalidShape {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    Comm(CommErr),
    LoadFailure(String),
    NotFitted,
    DesynchronizedDraws,
}

impl Display for KMeansErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KMeansErr::InvalidConfig(detail) => write!(f, "invalid configuration: {detail}"),
            KMeansErr::InvalidShape {
                what,
                got,
                expected,
            } => write!(f, "invalid shape for {what}: got {got}, expected {expected}"),
            KMeansErr::Comm(e) => write!(f, "collective failed: {e}"),
            KMeansErr::LoadFailure(detail) => write!(f, "failed to load: {detail}"),
            KMeansErr::NotFitted => write!(f, "the model has no centroids yet, call fit first"),
            KMeansErr::DesynchronizedDraws => write!(
                f,
                "the ranks of the group made different sequences of shared random draws"
            ),
        }
    }
}

impl Error for KMeansErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            KMeansErr::Comm(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommErr> for KMeansErr {
    fn from(value: CommErr) -> Self {
        Self::Comm(value)
    }
}
