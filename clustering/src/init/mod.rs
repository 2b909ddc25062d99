mod given;
mod plusplus;
mod random;

use std::fmt::Debug;

use comms::Collective;

pub use given::GivenCentroids;
pub use plusplus::{DEFAULT_OVERSAMPLING, KMeansPlusPlus, SeedingReport, round_budget};
pub use random::RandomInit;

use crate::{CentroidSet, Result, Shard, rng::SharedRng};

/// Produces the centroids the Lloyd iterations start from.
///
/// Every rank calls `seed` with its own shard and the same `k`. Implementors may only issue
/// collectives and shared draws in an order that doesn't depend on the local data, so that
/// every rank ends up with an identical set.
pub trait Initializer: Send + Sync + Debug {
    /// Picks the starting centroids.
    ///
    /// # Arguments
    /// * `shard` - This rank's samples.
    /// * `k` - The amount of centroids to pick.
    /// * `comm` - The group the dataset is spread over.
    /// * `rng` - The generator shared by the group.
    ///
    /// # Returns
    /// The replicated set, with `k` rows unless the initializer documents otherwise.
    fn seed(
        &self,
        shard: &Shard,
        k: usize,
        comm: &dyn Collective,
        rng: &mut SharedRng,
    ) -> Result<CentroidSet>;
}
