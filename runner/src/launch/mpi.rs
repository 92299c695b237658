use super::RankReport;
use crate::{
    checkpoint::{new_run_id, store::HandoffStore, MigrationCheckpoint, ResumeHandle},
    collective::{mpi::MpiGroup, CollectiveGroup},
    config::RunnerConfig,
    driver::{check_numbering, IterationDriver, RunError, RunOutcome},
    scheduler::MigrationSchedulers,
    workload::Workload,
    world::WorldContext,
};
use std::{path::Path, time::Instant};
use tracing::info;

/// How the process instance of an MPI rank ended
#[derive(Debug)]
pub enum MpiExit {
    Completed(RankReport),
    /// the rank continues in another process started by the scheduler
    Migrated { host: String },
}

/// Run this process as one rank of an MPI world, either fresh or from a relaunch token
///
/// The token at `resume` is only consumed once it was accepted by this rank.
pub fn run_rank<W, F>(
    config: &RunnerConfig,
    total: usize,
    handle: ResumeHandle,
    resume: Option<&Path>,
    factory: F,
) -> Result<MpiExit, RunError>
where
    W: Workload,
    F: Fn(&ResumeHandle) -> W,
{
    let start = Instant::now();
    let group = MpiGroup::init().map_err(RunError::Initialization)?;
    let world = WorldContext::discover(&group);
    let scheduler = MigrationSchedulers::load(&config.migration);

    let (outcome, migrations) = match resume {
        Some(path) => {
            let token = HandoffStore::read_expecting(path, total)?;
            check_numbering(&token, &world)?;
            HandoffStore::consume(path, &token)?;

            info!(
                rank = world.rank,
                host = %world.host,
                "Resuming with {} iterations left",
                token.remaining
            );

            let outcome =
                IterationDriver::new(&group, world.clone(), factory(&token.handle), scheduler)
                    .with_progress_interval(config.progress.interval)
                    .resume(&token)?;

            (outcome, token.generation)
        }
        None => {
            let outcome = IterationDriver::new(&group, world.clone(), factory(&handle), scheduler)
                .with_progress_interval(config.progress.interval)
                .run(total, MigrationCheckpoint::new(new_run_id(), handle))?;

            (outcome, 0)
        }
    };

    Ok(match outcome {
        RunOutcome::Completed { executed } => MpiExit::Completed(RankReport {
            rank: group.rank(),
            executed,
            migrations,
            host: world.host,
            elapsed: start.elapsed(),
        }),
        RunOutcome::Migrated { host, .. } => MpiExit::Migrated { host },
    })
}
