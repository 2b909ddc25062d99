use comms::{Collective, ReduceOp};
use ndarray::Array2;

use super::Initializer;
use crate::{CentroidSet, KMeansErr, Result, Shard, rng::SharedRng};

/// Starts from centroids supplied by the caller.
///
/// Every rank must be handed the same matrix, which is checked against the group before use.
#[derive(Debug, Clone)]
pub struct GivenCentroids {
    centroids: Array2<f64>,
}

impl GivenCentroids {
    pub fn new(centroids: Array2<f64>) -> Self {
        Self { centroids }
    }
}

impl Initializer for GivenCentroids {
    fn seed(
        &self,
        shard: &Shard,
        k: usize,
        comm: &dyn Collective,
        _rng: &mut SharedRng,
    ) -> Result<CentroidSet> {
        let (rows, cols) = self.centroids.dim();

        if rows != k {
            return Err(KMeansErr::InvalidConfig(format!(
                "{rows} centroids were given for k = {k}"
            )));
        }

        if cols != shard.n_features() {
            return Err(KMeansErr::InvalidConfig(format!(
                "the given centroids have {cols} features, the samples have {}",
                shard.n_features()
            )));
        }

        // NaN never compares equal, so a NaN centroid fails here too.
        let lowest = CentroidSet::reduce(comm, &self.centroids, ReduceOp::Min)?;
        let highest = CentroidSet::reduce(comm, &self.centroids, ReduceOp::Max)?;
        if lowest != highest {
            return Err(KMeansErr::InvalidConfig(
                "the ranks were given different centroids".into(),
            ));
        }

        Ok(lowest)
    }
}
