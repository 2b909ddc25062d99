//! K-Means over a dataset partitioned across a group of ranks.
//!
//! Every rank holds a contiguous `Shard` of the samples and runs the same program. The ranks
//! never exchange samples, only the reductions of `comms::Collective`, so that the seeding
//! and the Lloyd iterations leave an identical `CentroidSet` on every rank.

mod builder;
mod centroids;
mod config;
mod error;
mod kmeans;
mod shard;

pub mod distance;
pub mod init;
pub mod lloyd;
pub mod persist;
pub mod rng;

pub use builder::KMeansBuilder;
pub use centroids::CentroidSet;
pub use config::{EmptyClusterPolicy, InitSpec, KMeansConfig, MetricSpec};
pub use error::{KMeansErr, Result};
pub use kmeans::KMeans;
pub use lloyd::{FitReport, FitState};
pub use shard::{Shard, load_csv_shard, owner_of, shard_range};
