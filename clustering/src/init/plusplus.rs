use comms::{Collective, ReduceOp};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView2, Axis, concatenate};
use rand::{Rng, rngs::StdRng};

use super::{Initializer, RandomInit};
use crate::{
    CentroidSet, KMeansErr, Result, Shard,
    centroids::all_reduce_matrix,
    distance::{DistanceMetric, SquaredEuclidean, argmin_columns, min_columns},
    rng::{SharedRng, local_rng},
};

/// The default factor on each sample's share of the local potential.
pub const DEFAULT_OVERSAMPLING: f64 = 2.;

/// What the oversampling rounds of a k-means++ seeding produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeedingReport {
    /// The global potential around the first seed.
    pub potential: f64,
    /// The amount of rounds, fixed from `potential` before the first one.
    pub rounds: usize,
    /// The size of the pool the centroids were drawn from.
    pub candidates: usize,
}

/// Seeds with the oversampling variant of k-means++.
///
/// Starting from one random sample, every round includes each sample with probability
/// proportional to its squared distance to the closest candidate so far. The pool is then
/// weighed by how many samples each candidate is closest to and `k` candidates are drawn from
/// it without replacement.
#[derive(Debug, Clone)]
pub struct KMeansPlusPlus {
    oversampling: f64,
}

impl Default for KMeansPlusPlus {
    fn default() -> Self {
        Self::new(DEFAULT_OVERSAMPLING)
    }
}

impl KMeansPlusPlus {
    /// Creates a new `KMeansPlusPlus`.
    ///
    /// # Arguments
    /// * `oversampling` - How many candidates each rank expects to add per round.
    pub fn new(oversampling: f64) -> Self {
        Self { oversampling }
    }

    /// Runs one oversampling round.
    ///
    /// Every rank executes both collectives even when it has nothing to contribute.
    ///
    /// # Returns
    /// The candidates the whole group picked this round, `None` if there were none.
    fn expand(
        &self,
        samples: ArrayView2<f64>,
        potentials: &Array1<f64>,
        comm: &dyn Collective,
        rng: &mut StdRng,
    ) -> Result<Option<Array2<f64>>> {
        let local_sum = potentials.sum();

        let picked: Vec<usize> = potentials
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| {
                let threshold: f64 = rng.random();
                let p = if local_sum > 0. {
                    self.oversampling * d / local_sum
                } else {
                    0.
                };
                (threshold < p).then_some(i)
            })
            .collect();

        let count = picked.len() as f64;
        let offset = comm.exclusive_scan(&[count], ReduceOp::Sum)?[0] as usize;
        let total = comm.all_reduce_scalar(count, ReduceOp::Sum)? as usize;

        if total == 0 {
            return Ok(None);
        }

        let mut packed = Array2::zeros((total, samples.ncols()));
        for (slot, &i) in picked.iter().enumerate() {
            packed.row_mut(offset + slot).assign(&samples.row(i));
        }

        all_reduce_matrix(comm, &packed, ReduceOp::Sum).map(Some)
    }

    /// Seeds like `Initializer::seed` and also reports how the candidate pool was built.
    pub fn seed_with_report(
        &self,
        shard: &Shard,
        k: usize,
        comm: &dyn Collective,
        rng: &mut SharedRng,
    ) -> Result<(CentroidSet, SeedingReport)> {
        let mut local = local_rng(rng.derive_seed(), comm.rank());
        let samples = shard.samples();

        let mut pool = RandomInit.seed(shard, 1, comm, rng)?.into_inner();
        let mut potentials = nearest_potentials(pool.view(), samples)?;

        let total = comm.all_reduce_scalar(potentials.sum(), ReduceOp::Sum)?;
        let rounds = round_budget(total);
        if rounds == 0 {
            warn!(total = total; "no oversampling rounds, the pool holds only the first seed");
        }

        for round in 0..rounds {
            let Some(grown) = self.expand(samples, &potentials, comm, &mut local)? else {
                debug!(round = round; "oversampling round picked nothing");
                continue;
            };

            let fresh = nearest_potentials(grown.view(), samples)?;
            potentials.zip_mut_with(&fresh, |p, &q| *p = p.min(q));

            pool = concatenate(Axis(0), &[pool.view(), grown.view()]).map_err(|_| {
                KMeansErr::InvalidShape {
                    what: "candidate features",
                    got: grown.ncols(),
                    expected: pool.ncols(),
                }
            })?;

            debug!(round = round, candidates = pool.nrows(); "candidate pool grew");
        }

        let weights = weigh(pool.view(), samples, comm)?;
        let picked = select_weighted(&weights, k, rng);

        if picked.len() < k {
            warn!(
                k = k, candidates = picked.len();
                "the candidate pool is smaller than k, seeding with fewer centroids"
            );
        }

        info!(rounds = rounds, candidates = pool.nrows(); "k-means++ seeding finished");
        let report = SeedingReport {
            potential: total,
            rounds,
            candidates: pool.nrows(),
        };

        Ok((CentroidSet::from_matrix(pool.select(Axis(0), &picked))?, report))
    }
}

impl Initializer for KMeansPlusPlus {
    fn seed(
        &self,
        shard: &Shard,
        k: usize,
        comm: &dyn Collective,
        rng: &mut SharedRng,
    ) -> Result<CentroidSet> {
        self.seed_with_report(shard, k, comm, rng).map(|(centroids, _)| centroids)
    }
}

/// The amount of oversampling rounds for a given global potential.
///
/// # Returns
/// `ceil(ln(total))`, or 0 when that isn't a positive finite number.
pub fn round_budget(total: f64) -> usize {
    let rounds = total.ln().ceil();

    if rounds.is_finite() && rounds > 0. {
        rounds as usize
    } else {
        0
    }
}

/// The squared distance from every sample to its closest candidate.
fn nearest_potentials(candidates: ArrayView2<f64>, samples: ArrayView2<f64>) -> Result<Array1<f64>> {
    let distances = SquaredEuclidean.pairwise(candidates, samples)?;
    Ok(min_columns(distances.view()))
}

/// Counts, for every candidate, how many samples across the group are closest to it.
fn weigh(pool: ArrayView2<f64>, samples: ArrayView2<f64>, comm: &dyn Collective) -> Result<Vec<f64>> {
    let distances = SquaredEuclidean.pairwise(pool, samples)?;

    let mut counts = vec![0.; pool.nrows()];
    for j in argmin_columns(distances.view()) {
        counts[j] += 1.;
    }

    Ok(comm.all_reduce(&counts, ReduceOp::Sum)?)
}

/// Draws up to `k` distinct candidates with probability proportional to their weight.
///
/// Candidate `j` covers the half open range `[lower_j, upper_j)` of the cumulative weights, a
/// picked candidate's range collapses and the draw range shrinks with it. Once the remaining
/// weight is gone the unpicked candidates fill the remaining slots in index order.
fn select_weighted(weights: &[f64], k: usize, rng: &mut SharedRng) -> Vec<usize> {
    // The weights are sample counts, exact in an f64.
    let mut remaining: Vec<u64> = weights.iter().map(|&w| w as u64).collect();
    let mut left: u64 = remaining.iter().sum();
    let mut picked = Vec::with_capacity(k);

    while picked.len() < k && left > 0 {
        let r = rng.index(left as usize) as u64;

        let mut lower = 0;
        let mut chosen = remaining.len() - 1;
        for (j, &w) in remaining.iter().enumerate() {
            if r < lower + w {
                chosen = j;
                break;
            }
            lower += w;
        }

        left -= remaining[chosen];
        remaining[chosen] = 0;
        picked.push(chosen);
    }

    if picked.len() < k {
        let mut unpicked: Vec<usize> = (0..weights.len()).filter(|j| !picked.contains(j)).collect();
        unpicked.truncate(k - picked.len());
        picked.extend(unpicked);
    }

    picked
}
