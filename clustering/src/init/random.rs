use comms::{Collective, ReduceOp};
use log::debug;
use ndarray::Array2;

use super::Initializer;
use crate::{CentroidSet, Result, Shard, rng::SharedRng};

/// Picks `k` samples uniformly at random, with replacement.
///
/// Every rank draws the same `k` global indices. The owner of each index writes the sample
/// into its slot and everyone else leaves zeros, so a single sum over the group fills every
/// slot. Drawing the same index twice yields a duplicated centroid.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomInit;

impl Initializer for RandomInit {
    fn seed(
        &self,
        shard: &Shard,
        k: usize,
        comm: &dyn Collective,
        rng: &mut SharedRng,
    ) -> Result<CentroidSet> {
        let n = shard.global_n_samples();
        let mut slots = Array2::zeros((k, shard.n_features()));

        for (slot, mut row) in slots.rows_mut().into_iter().enumerate() {
            let index = rng.index(n);
            debug!(slot = slot, index = index; "random centroid drawn");

            if let Some(local) = shard.local_index(index) {
                row.assign(&shard.sample(local));
            }
        }

        CentroidSet::reduce(comm, &slots, ReduceOp::Sum)
    }
}
