use std::thread;

use anyhow::{Context, anyhow};
use comms::{LocalGroup, TcpCollective};
use log::{info, warn};

use worker::{Launch, RunSummary, WorkerConfig, run};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = WorkerConfig::from_env().context("reading the worker configuration")?;

    // The collectives block, the process runs no async runtime of its own.
    let summary = match config.launch {
        Launch::Local { workers } => {
            info!(workers = workers.get(); "running an in-process group");

            let group = LocalGroup::new_group(workers);
            let summaries = thread::scope(|s| {
                let handles: Vec<_> = group
                    .into_iter()
                    .map(|comm| {
                        let config = &config;
                        s.spawn(move || run(&comm, config))
                    })
                    .collect();

                handles
                    .into_iter()
                    .map(|handle| handle.join().map_err(|_| anyhow!("a worker thread panicked")))
                    .collect::<anyhow::Result<Vec<_>>>()
            })?;

            let mut summary = None;
            for result in summaries {
                summary = Some(result?);
            }
            summary.context("the group had no workers")?
        }
        Launch::Tcp {
            rank,
            world_size,
            root,
        } => {
            let comm = TcpCollective::connect(rank, world_size, root)
                .with_context(|| format!("joining the group at {root}"))?;

            match run(&comm, &config) {
                Ok(summary) => {
                    comm.disconnect()?;
                    summary
                }
                Err(e) => {
                    if let Err(abort) = comm.abort(&e.to_string()) {
                        warn!("couldn't notify the group: {abort}");
                    }
                    return Err(e.into());
                }
            }
        }
    };

    report(&summary);
    Ok(())
}

fn report(summary: &RunSummary) {
    let RunSummary {
        report,
        cluster_sizes,
    } = summary;

    info!(
        iterations = report.iterations, changed = report.changed, inertia = report.inertia;
        "finished with {:?}, cluster sizes {cluster_sizes:?}", report.state
    );
}
