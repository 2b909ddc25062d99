use std::num::NonZeroUsize;

use clustering::{FitReport, KMeans, load_csv_shard, persist};
use comms::{Collective, ReduceOp};
use log::{error, info};

use crate::{Result, WorkerConfig, WorkerErr};

/// What a worker reports once the run is over.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub report: FitReport,
    /// The amount of samples of the whole group assigned to every centroid.
    pub cluster_sizes: Vec<usize>,
}

/// Runs one worker's part of a clustering run.
///
/// Every rank of `comm` must call this with the same configuration. The shard is loaded,
/// the model fitted and, if an output path is set, rank 0 saves the centroids. A rank that
/// fails to load or save fails the whole group, so no rank is left waiting on a collective.
///
/// # Returns
/// The summary, identical on every rank.
pub fn run(comm: &dyn Collective, config: &WorkerConfig) -> Result<RunSummary> {
    let rank = comm.rank();
    let world_size = NonZeroUsize::new(comm.world_size()).unwrap_or(NonZeroUsize::MIN);

    let loaded = load_csv_shard(&config.data, rank, world_size);
    let shard = settle(comm, loaded, "couldn't load its shard")?;
    info!(rank = rank, n_local = shard.n_local(); "shard loaded");

    let mut model = KMeans::new(config.kmeans.clone())?;
    let report = model.fit(&shard, comm)?;

    let labels = model.predict(shard.samples())?;
    let k = model.centroids().map_or(0, |c| c.k());

    let mut counts = vec![0.; k];
    for label in labels {
        counts[label] += 1.;
    }
    let cluster_sizes = comm
        .all_reduce(&counts, ReduceOp::Sum)?
        .into_iter()
        .map(|count| count as usize)
        .collect();

    if let Some(output) = &config.output {
        let saved = match (rank, model.centroids()) {
            (0, Some(centroids)) => persist::save_centroids(output, centroids),
            _ => Ok(()),
        };

        settle(comm, saved, "couldn't save the centroids")?;
    }

    Ok(RunSummary {
        report,
        cluster_sizes,
    })
}

/// Tells the whole group whether a local step failed on any rank.
///
/// Every rank must call this for the same step, the lowest failing rank is the one reported.
///
/// # Returns
/// The local outcome if every rank succeeded, the local error on a failing rank, and
/// `PeerFailed` on the others.
fn settle<T>(
    comm: &dyn Collective,
    outcome: clustering::Result<T>,
    detail: &'static str,
) -> Result<T> {
    let rank = comm.rank();
    let local = if outcome.is_err() {
        rank as f64
    } else {
        f64::INFINITY
    };

    let failed = comm.all_reduce_scalar(local, ReduceOp::Min)?;
    match outcome {
        Err(e) => {
            error!(rank = rank; "{e}");
            Err(e.into())
        }
        Ok(_) if failed.is_finite() => Err(WorkerErr::PeerFailed {
            rank: failed as usize,
            detail,
        }),
        Ok(value) => Ok(value),
    }
}
