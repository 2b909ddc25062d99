use std::{error::Error, fmt, io};

use clustering::KMeansErr;
use comms::CommErr;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Env { var: &'static str, detail: String },
    KMeans(KMeansErr),
    Comm(CommErr),
    PeerFailed { rank: usize, detail: &'static str },
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Env { var, detail } => write!(f, "bad environment variable {var}: {detail}"),
            WorkerErr::KMeans(e) => write!(f, "k-means failed: {e}"),
            WorkerErr::Comm(e) => write!(f, "group failed: {e}"),
            WorkerErr::PeerFailed { rank, detail } => write!(f, "rank {rank} failed: {detail}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::KMeans(e) => Some(e),
            WorkerErr::Comm(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<KMeansErr> for WorkerErr {
    fn from(value: KMeansErr) -> Self {
        Self::KMeans(value)
    }
}

impl From<CommErr> for WorkerErr {
    fn from(value: CommErr) -> Self {
        Self::Comm(value)
    }
}
