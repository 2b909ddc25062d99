use std::num::NonZeroUsize;

use comms::{Collective, ReduceOp};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::{
    CentroidSet, EmptyClusterPolicy, Result, Shard,
    centroids::all_reduce_matrix,
    distance::{DistanceMetric, argmin_columns},
};

/// Where the iterations stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitState {
    Initialized,
    Iterating,
    Converged,
    MaxItersReached,
}

/// The outcome of a finished fit, identical on every rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub state: FitState,
    pub iterations: usize,
    /// The amount of samples that changed cluster in the last iteration.
    pub changed: usize,
    /// The sum of squared distances from every sample to its centroid.
    pub inertia: f64,
}

/// Runs Lloyd iterations over a dataset spread across a group.
///
/// Each iteration assigns the local samples, packs the per cluster sums, the per cluster counts
/// and the amount of reassigned samples into a single f×(2k+1) matrix and reduces it with one
/// sum. Column `j < k` holds the sums of cluster `j`, row 0 of column `k + j` its count and
/// `[0, 2k]` the reassignments.
#[derive(Debug)]
pub struct Lloyd<'a> {
    metric: &'a dyn DistanceMetric,
    max_iter: NonZeroUsize,
    tolerance: f64,
    empty_cluster: EmptyClusterPolicy,
    state: FitState,
}

impl<'a> Lloyd<'a> {
    /// Creates a new `Lloyd` engine.
    ///
    /// # Arguments
    /// * `metric` - The metric samples are assigned by.
    /// * `max_iter` - The maximum amount of iterations.
    /// * `tolerance` - The fraction of the samples below which reassignments count as converged.
    /// * `empty_cluster` - What to do with clusters that lose every sample.
    pub fn new(
        metric: &'a dyn DistanceMetric,
        max_iter: NonZeroUsize,
        tolerance: f64,
        empty_cluster: EmptyClusterPolicy,
    ) -> Self {
        Self {
            metric,
            max_iter,
            tolerance,
            empty_cluster,
            state: FitState::Initialized,
        }
    }

    pub fn state(&self) -> FitState {
        self.state
    }

    /// Iterates from `init` until convergence or until `max_iter` iterations ran.
    ///
    /// # Returns
    /// The final centroids and the report, both identical on every rank.
    pub fn run(
        &mut self,
        shard: &Shard,
        init: CentroidSet,
        comm: &dyn Collective,
    ) -> Result<(CentroidSet, FitReport)> {
        // A floor of 0 would never trigger, the `changed == 0` check covers it.
        let threshold = (self.tolerance * shard.global_n_samples() as f64).floor() as usize;

        let mut previous = vec![None; shard.n_local()];
        let mut centroids = init;
        let mut iterations = 0;
        let mut changed = shard.global_n_samples();

        self.state = FitState::Iterating;

        while iterations < self.max_iter.get() {
            (centroids, changed) = self.step(shard, &centroids, &mut previous, comm)?;
            iterations += 1;

            debug!(rank = comm.rank(), iteration = iterations, changed = changed; "lloyd iteration");

            if changed == 0 || changed < threshold {
                self.state = FitState::Converged;
                break;
            }
        }

        if self.state == FitState::Iterating {
            self.state = FitState::MaxItersReached;
        }

        let inertia = inertia(self.metric, shard, &centroids, comm)?;
        info!(
            iterations = iterations, changed = changed, inertia = inertia;
            "lloyd iterations finished"
        );

        let report = FitReport {
            state: self.state,
            iterations,
            changed,
            inertia,
        };

        Ok((centroids, report))
    }

    /// Runs a single assign and update iteration.
    ///
    /// # Returns
    /// The updated centroids and the global amount of reassigned samples.
    fn step(
        &self,
        shard: &Shard,
        centroids: &CentroidSet,
        previous: &mut [Option<usize>],
        comm: &dyn Collective,
    ) -> Result<(CentroidSet, usize)> {
        let k = centroids.k();
        let samples = shard.samples();

        let distances = self.metric.pairwise(centroids.view(), samples)?;
        let assignments = argmin_columns(distances.view());

        let mut acc = Array2::<f64>::zeros((shard.n_features(), 2 * k + 1));
        let mut changed = 0;

        for ((i, &j), prev) in assignments.iter().enumerate().zip(previous.iter_mut()) {
            let mut sums = acc.column_mut(j);
            sums += &samples.row(i);
            acc[[0, k + j]] += 1.;

            if *prev != Some(j) {
                changed += 1;
                *prev = Some(j);
            }
        }

        acc[[0, 2 * k]] = changed as f64;

        let acc = all_reduce_matrix(comm, &acc, ReduceOp::Sum)?;
        let changed = acc[[0, 2 * k]] as usize;

        let mut next = Array2::<f64>::zeros((k, shard.n_features()));
        let mut empty = Vec::new();

        for (j, mut row) in next.rows_mut().into_iter().enumerate() {
            let count = acc[[0, k + j]];
            if count > 0. {
                row.assign(&acc.column(j).mapv(|s| s / count));
                continue;
            }

            warn!(cluster = j; "a cluster has no samples");
            match self.empty_cluster {
                EmptyClusterPolicy::Keep => row.assign(&centroids.centroid(j)),
                EmptyClusterPolicy::Propagate => row.assign(&acc.column(j).mapv(|s| s / count)),
                EmptyClusterPolicy::ReseedFarthest => empty.push(j),
            }
        }

        if !empty.is_empty() {
            let mut spread = assigned_distances(distances.view(), &assignments);
            for j in empty {
                let sample = farthest_sample(shard, &mut spread, comm)?;
                next.row_mut(j).assign(&sample);
            }
        }

        Ok((CentroidSet::from_matrix(next)?, changed))
    }
}

/// The distance from every local sample to the centroid it was assigned to.
fn assigned_distances(distances: ArrayView2<f64>, assignments: &[usize]) -> Array1<f64> {
    assignments
        .iter()
        .enumerate()
        .map(|(i, &j)| distances[[j, i]])
        .collect()
}

/// Finds the sample of the whole group farthest from its centroid and hands it to every rank.
///
/// The largest distance is found with a max over the group and ties go to the lowest global
/// index through a min. The winner's distance is cleared so that the next empty cluster gets
/// a different sample.
fn farthest_sample(
    shard: &Shard,
    spread: &mut Array1<f64>,
    comm: &dyn Collective,
) -> Result<Array1<f64>> {
    let mut local_best: Option<(usize, f64)> = None;
    for (i, &d) in spread.iter().enumerate() {
        if local_best.is_none_or(|(_, best)| d > best) {
            local_best = Some((i, d));
        }
    }

    let local_max = local_best.map_or(f64::NEG_INFINITY, |(_, d)| d);
    let global_max = comm.all_reduce_scalar(local_max, ReduceOp::Max)?;

    let candidate = match local_best {
        Some((i, d)) if d == global_max => (shard.global_offset() + i) as f64,
        _ => f64::INFINITY,
    };
    let winner = comm.all_reduce_scalar(candidate, ReduceOp::Min)?;

    let mut sample = Array1::zeros(shard.n_features());
    let owned = winner
        .is_finite()
        .then(|| shard.local_index(winner as usize))
        .flatten();

    if let Some(local) = owned {
        sample.assign(&shard.sample(local));
        spread[local] = f64::NEG_INFINITY;
    }

    let sample = comm.all_reduce(sample.as_slice().unwrap_or_default(), ReduceOp::Sum)?;
    debug!(index = winner; "empty cluster reseeded");
    Ok(Array1::from_vec(sample))
}

/// The sum of squared distances from every sample of the group to its closest centroid.
pub fn inertia(
    metric: &dyn DistanceMetric,
    shard: &Shard,
    centroids: &CentroidSet,
    comm: &dyn Collective,
) -> Result<f64> {
    let distances = metric.pairwise(centroids.view(), shard.samples())?;
    let local: f64 = distances
        .axis_iter(Axis(1))
        .zip(argmin_columns(distances.view()))
        .map(|(column, j)| metric.squared(column[j]))
        .sum();

    Ok(comm.all_reduce_scalar(local, ReduceOp::Sum)?)
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use comms::LocalGroup;
    use ndarray::array;

    use super::*;
    use crate::distance::{Euclidean, SquaredEuclidean};

    fn solo() -> LocalGroup {
        LocalGroup::new_group(NonZeroUsize::MIN).remove(0)
    }

    fn shard(data: Array2<f64>) -> Shard {
        let n = data.nrows();
        Shard::new(data, 0, n).unwrap()
    }

    fn centroids(matrix: Array2<f64>) -> CentroidSet {
        CentroidSet::from_matrix(matrix).unwrap()
    }

    fn engine(max_iter: usize, policy: EmptyClusterPolicy) -> Lloyd<'static> {
        Lloyd::new(
            &Euclidean,
            NonZeroUsize::new(max_iter).unwrap(),
            0.,
            policy,
        )
    }

    #[test]
    fn converges_on_two_pairs() {
        let shard = shard(array![[-1., -1.], [-2., -1.], [1., 1.], [2., 1.]]);
        let init = centroids(array![[-1., -1.], [1., 1.]]);

        let mut lloyd = engine(10, EmptyClusterPolicy::Keep);
        assert_eq!(lloyd.state(), FitState::Initialized);

        let (found, report) = lloyd.run(&shard, init, &solo()).unwrap();

        assert_eq!(found.view(), array![[-1.5, -1.], [1.5, 1.]]);
        assert_eq!(report.state, FitState::Converged);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.changed, 0);
        assert_eq!(report.inertia, 1.);
        assert_eq!(lloyd.state(), FitState::Converged);
    }

    #[test]
    fn single_iteration_is_a_normal_stop() {
        let shard = shard(array![[0.], [1.], [10.], [11.]]);
        let init = centroids(array![[0.], [1.]]);

        let (found, report) = engine(1, EmptyClusterPolicy::Keep)
            .run(&shard, init, &solo())
            .unwrap();

        assert_eq!(report.state, FitState::MaxItersReached);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.changed, 4);
        assert_eq!(found.view(), array![[0.], [22. / 3.]]);
    }

    #[test]
    fn tolerance_stops_early() {
        let shard = shard(array![[0.], [1.], [10.], [11.]]);
        let init = centroids(array![[0.], [1.]]);

        let mut lloyd = Lloyd::new(
            &SquaredEuclidean,
            NonZeroUsize::new(10).unwrap(),
            0.99,
            EmptyClusterPolicy::Keep,
        );
        let (_, report) = lloyd.run(&shard, init, &solo()).unwrap();

        // floor(0.99 * 4) = 3, the second iteration only moves one sample.
        assert_eq!(report.state, FitState::Converged);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.changed, 1);
    }

    #[test]
    fn empty_cluster_is_kept() {
        let shard = shard(array![[0.], [1.]]);
        let init = centroids(array![[0.5], [100.]]);

        let (found, _) = engine(1, EmptyClusterPolicy::Keep)
            .run(&shard, init, &solo())
            .unwrap();

        assert_eq!(found.view(), array![[0.5], [100.]]);
    }

    #[test]
    fn empty_cluster_propagates_nan() {
        let shard = shard(array![[0.], [1.]]);
        let init = centroids(array![[0.5], [100.]]);

        let (found, _) = engine(1, EmptyClusterPolicy::Propagate)
            .run(&shard, init, &solo())
            .unwrap();

        assert_eq!(found.centroid(0)[0], 0.5);
        assert!(found.centroid(1)[0].is_nan());
    }

    #[test]
    fn empty_cluster_takes_the_farthest_sample() {
        let shard = shard(array![[0.], [1.], [4.]]);
        let init = centroids(array![[0.], [100.], [200.]]);

        let (found, _) = engine(1, EmptyClusterPolicy::ReseedFarthest)
            .run(&shard, init, &solo())
            .unwrap();

        // Distances to the only used centroid are 0, 1 and 4.
        assert_eq!(found.view(), array![[5. / 3.], [4.], [1.]]);
    }
}
