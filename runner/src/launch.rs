#[cfg(feature = "mpi")]
pub mod mpi;

use crate::{
    checkpoint::{
        new_run_id, store::HandoffStore, CheckpointToken, MigrationCheckpoint, ResumeHandle,
    },
    collective::{local::LocalGroup, CollectiveError, CollectiveGroup},
    config::{MigrationConfig, RunnerConfig},
    driver::{IterationDriver, RunError, RunOutcome},
    scheduler::MigrationSchedulers,
    workload::Workload,
    world::{local_hostname, WorldContext},
};
use std::{thread, time::Duration, time::Instant};
use tracing::{debug, error, info, warn};
use tracing_unwrap::ResultExt;

/// What one rank did over the whole logical run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankReport {
    pub rank: usize,
    pub executed: usize,
    pub migrations: u32,
    pub host: String,
    pub elapsed: Duration,
}

enum Entry {
    Fresh(usize),
    Resume(CheckpointToken),
}

/// Runs a whole world inside this process, one thread per rank
///
/// A migrating rank is recreated in place: its instance ends, a new one with a
/// fresh group handle and world context on the target host resumes from the
/// token in the hand-off store.
#[derive(Debug, Clone)]
pub struct LocalLauncher {
    world_size: usize,
    pin_threads: bool,
    migration: MigrationConfig,
    progress: Option<usize>,
}

impl LocalLauncher {
    pub fn new(world_size: usize, config: &RunnerConfig) -> Self {
        let mut migration = config.migration.clone();

        // migrated ranks are recreated in-process, a relaunch would race for the token
        if let Some(relaunch) = migration.relaunch.take() {
            warn!(command = ?relaunch, "Ignoring migration.relaunch for a local world");
        }

        Self {
            world_size,
            pin_threads: false,
            migration,
            progress: config.progress.interval,
        }
    }

    pub fn pin_threads(mut self, pin_threads: bool) -> Self {
        self.pin_threads = pin_threads;
        self
    }

    /// run `total` iterations on every rank, `factory` builds the workload of each process instance
    pub fn launch<W, F>(
        &self,
        total: usize,
        handle: ResumeHandle,
        factory: F,
    ) -> Result<Vec<RankReport>, RunError>
    where
        W: Workload,
        F: Fn(&ResumeHandle) -> W + Sync,
    {
        if total == 0 {
            return Err(RunError::Usage(
                "the number of iterations must be at least 1".to_string(),
            ));
        }

        let handles = LocalGroup::new(self.world_size).map_err(RunError::Initialization)?;
        let run_id = new_run_id();
        let host = local_hostname();

        info!(
            world_size = self.world_size,
            run_id = %run_id,
            "Launching local world for {handle}"
        );

        let abandon = handles[0].rejoin();

        let results = thread::scope(|scope| {
            let mut joins = Vec::with_capacity(handles.len());

            for group in handles {
                let rank = group.rank();
                let spawned = thread::Builder::new()
                    .name(format!("rank-{rank}"))
                    .spawn_scoped(scope, {
                        let (run_id, host, handle, factory) = (&run_id, &host, &handle, &factory);
                        move || self.rank_main(group, total, run_id, host.clone(), handle, factory)
                    });

                match spawned {
                    Ok(join) => joins.push(join),
                    Err(spawn_error) => {
                        error!(rank, error = ?spawn_error, "Failed to start rank thread");

                        // ranks that already run must not wait for this one
                        abandon.abandon();

                        return Err(RunError::Initialization(CollectiveError::Initialization(
                            format!("failed to start thread for rank {rank}: {spawn_error}"),
                        )));
                    }
                }
            }

            Ok(joins
                .into_iter()
                .map(|join| join.join().unwrap_or_log())
                .collect::<Vec<_>>())
        })?;

        let mut reports = Vec::with_capacity(results.len());
        let mut errors = Vec::new();

        for result in results {
            match result {
                Ok(report) => reports.push(report),
                Err(error) => errors.push(error),
            }
        }

        // peers that were only woken up hide the failure that caused it
        let cause = errors
            .iter()
            .position(|error| {
                !matches!(
                    error,
                    RunError::Collective(CollectiveError::Abandoned { .. })
                )
            })
            .unwrap_or(0);

        if errors.is_empty() {
            Ok(reports)
        } else {
            Err(errors.swap_remove(cause))
        }
    }

    fn rank_main<W, F>(
        &self,
        group: LocalGroup,
        total: usize,
        run_id: &str,
        host: String,
        handle: &ResumeHandle,
        factory: &F,
    ) -> Result<RankReport, RunError>
    where
        W: Workload,
        F: Fn(&ResumeHandle) -> W,
    {
        let result = self.rank_loop(&group, total, run_id, host, handle, factory);

        if result.is_err() {
            group.abandon();
        }

        result
    }

    fn rank_loop<W, F>(
        &self,
        group: &LocalGroup,
        total: usize,
        run_id: &str,
        mut host: String,
        handle: &ResumeHandle,
        factory: &F,
    ) -> Result<RankReport, RunError>
    where
        W: Workload,
        F: Fn(&ResumeHandle) -> W,
    {
        let start = Instant::now();
        let mut entry = Entry::Fresh(total);
        let mut executed = 0;
        let mut migrations = 0;

        if self.pin_threads {
            pin_to_core(group.rank());
        }

        loop {
            // a new process instance: fresh group handle, context and workload
            let instance = group.rejoin();
            let world = WorldContext::on_host(&instance, host.clone());
            let scheduler = MigrationSchedulers::load(&self.migration);

            let outcome = match entry {
                Entry::Fresh(total) => {
                    IterationDriver::new(&instance, world, factory(handle), scheduler)
                        .with_progress_interval(self.progress)
                        .run(total, MigrationCheckpoint::new(run_id, handle.clone()))?
                }
                Entry::Resume(ref token) => {
                    IterationDriver::new(&instance, world, factory(&token.handle), scheduler)
                        .with_progress_interval(self.progress)
                        .resume(token)?
                }
            };

            executed += outcome.executed();

            match outcome {
                RunOutcome::Completed { .. } => {
                    return Ok(RankReport {
                        rank: group.rank(),
                        executed,
                        migrations,
                        host,
                        elapsed: start.elapsed(),
                    })
                }
                RunOutcome::Migrated {
                    host: target,
                    token_path,
                    ..
                } => {
                    migrations += 1;
                    debug!(rank = group.rank(), to = %target, "Recreating rank after migration");

                    host = target;
                    entry = Entry::Resume(HandoffStore::take(&token_path)?);
                }
            }
        }
    }
}

fn pin_to_core(rank: usize) {
    let cores = affinity::get_core_num();

    if cores == 0 {
        return;
    }

    match affinity::set_thread_affinity([rank % cores]) {
        Ok(()) => debug!(rank, core = rank % cores, "Pinned rank thread"),
        Err(error) => warn!(rank, "Failed to pin rank thread: {error}"),
    }
}
