pub mod config;
pub mod error;
pub mod runner;

pub use config::{Launch, WorkerConfig};
pub use error::{Result, WorkerErr};
pub use runner::{RunSummary, run};
