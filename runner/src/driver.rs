use crate::{
    checkpoint::{store::HandoffError, CheckpointToken, MigrationCheckpoint},
    collective::{CollectiveError, CollectiveGroup},
    config::ConfigErrors,
    scheduler::{MigrationError, MigrationOutcome, MigrationScheduler},
    workload::{IterationContext, Workload, WorkloadError},
    world::{IterationState, WorldContext},
};
use std::{path::PathBuf, time::Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace};

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to initialize the collective substrate")]
    Initialization(#[source] CollectiveError),
    #[error("{0}")]
    Usage(String),
    #[error(
        "Token of rank {token_rank}/{token_world_size} cannot resume as rank {rank}/{world_size}"
    )]
    ForeignToken {
        token_rank: usize,
        token_world_size: usize,
        rank: usize,
        world_size: usize,
    },
    #[error(
        "All-to-all result diverged on rank {rank} at slot {slot}: expected {expected}, got {actual}"
    )]
    CollectiveMismatch {
        rank: usize,
        slot: usize,
        expected: i32,
        actual: i32,
    },
    #[error("Workload failed in iteration {index}")]
    Workload {
        index: usize,
        #[source]
        source: WorkloadError,
    },
    #[error("Collective rendezvous failed")]
    Collective(#[from] CollectiveError),
    #[error("Checkpoint hand-off failed")]
    Handoff(#[from] HandoffError),
    #[error("Migration failed")]
    Migration(#[from] MigrationError),
    #[error("Invalid configuration")]
    Config(#[from] ConfigErrors),
}

impl RunError {
    fn from_workload(index: usize, error: WorkloadError) -> Self {
        match error {
            WorkloadError::Mismatch {
                rank,
                slot,
                expected,
                actual,
            } => Self::CollectiveMismatch {
                rank,
                slot,
                expected,
                actual,
            },
            WorkloadError::Collective(error) => Self::Collective(error),
            source => Self::Workload { index, source },
        }
    }
}

/// How a process instance left the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// every iteration of the logical run is done
    Completed { executed: usize },
    /// this instance is done, the rank continues on `host` from `token`
    Migrated {
        executed: usize,
        host: String,
        token: CheckpointToken,
        token_path: PathBuf,
    },
}

impl RunOutcome {
    /// iterations executed by this process instance
    pub fn executed(&self) -> usize {
        match self {
            Self::Completed { executed } | Self::Migrated { executed, .. } => *executed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    PreBarrier,
    Executing,
    PostBarrier,
    CheckpointEval,
    Completed,
    Migrated,
}

/// A token only resumes under the rank and world size it was produced with
pub fn check_numbering(token: &CheckpointToken, world: &WorldContext) -> Result<(), RunError> {
    if token.origin.rank != world.rank || token.origin.world_size != world.world_size {
        return Err(RunError::ForeignToken {
            token_rank: token.origin.rank,
            token_world_size: token.origin.world_size,
            rank: world.rank,
            world_size: world.world_size,
        });
    }

    Ok(())
}

/// Iterations between two progress lines, never 0
pub fn progress_interval(total: usize, configured: Option<usize>) -> usize {
    configured.unwrap_or(total / 10).max(1)
}

/// Runs the iteration loop of one rank inside one process instance
pub struct IterationDriver<'g, G: CollectiveGroup, W: Workload, S: MigrationScheduler> {
    group: &'g G,
    world: WorldContext,
    workload: W,
    scheduler: S,
    progress: Option<usize>,
    reported: usize,
    state: DriverState,
}

impl<'g, G: CollectiveGroup, W: Workload, S: MigrationScheduler> IterationDriver<'g, G, W, S> {
    pub fn new(group: &'g G, world: WorldContext, workload: W, scheduler: S) -> Self {
        Self {
            group,
            world,
            workload,
            scheduler,
            progress: None,
            reported: 0,
            state: DriverState::Idle,
        }
    }

    pub fn with_progress_interval(mut self, interval: Option<usize>) -> Self {
        self.progress = interval;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// progress lines this instance emitted
    pub fn progress_reported(&self) -> usize {
        self.reported
    }

    pub fn world(&self) -> &WorldContext {
        &self.world
    }

    pub fn workload(&self) -> &W {
        &self.workload
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Start a logical run of `total` iterations
    #[instrument(skip(self, checkpoint), fields(rank = self.world.rank), level = "debug")]
    pub fn run(
        &mut self,
        total: usize,
        checkpoint: MigrationCheckpoint,
    ) -> Result<RunOutcome, RunError> {
        if total == 0 {
            return Err(RunError::Usage(
                "the number of iterations must be at least 1".to_string(),
            ));
        }

        self.guarded(IterationState::new(total), checkpoint)
    }

    /// Re-enter a run from a checkpoint token, the loop continues at `token.remaining`
    #[instrument(
        skip(self, token),
        fields(rank = self.world.rank, remaining = token.remaining),
        level = "debug"
    )]
    pub fn resume(&mut self, token: &CheckpointToken) -> Result<RunOutcome, RunError> {
        if token.remaining == 0 || token.remaining > token.total {
            return Err(RunError::Usage(format!(
                "cannot resume with {} of {} iterations remaining",
                token.remaining, token.total
            )));
        }

        check_numbering(token, &self.world)?;

        self.guarded(
            IterationState::resumed(token.total, token.remaining),
            MigrationCheckpoint::resumed(token),
        )
    }

    // a rank that leaves with an error tells its peers instead of letting them stall
    fn guarded(
        &mut self,
        state: IterationState,
        checkpoint: MigrationCheckpoint,
    ) -> Result<RunOutcome, RunError> {
        let result = self.drive(state, checkpoint);

        if let Err(error) = &result {
            error!(rank = self.world.rank, error = ?error, "Rank failed: {error}");
            self.group.abandon();
        }

        result
    }

    fn enter(&mut self, state: DriverState) {
        trace!(rank = self.world.rank, from = ?self.state, to = ?state, "Driver transition");
        self.state = state;
    }

    fn drive(
        &mut self,
        mut state: IterationState,
        checkpoint: MigrationCheckpoint,
    ) -> Result<RunOutcome, RunError> {
        let start = Instant::now();
        let first = state.completed();
        let total = state.total();
        let interval = progress_interval(total, self.progress);

        debug!(
            rank = self.world.rank,
            host = %self.world.host,
            remaining = state.remaining(),
            generation = checkpoint.generation(),
            "Entering loop for {}",
            checkpoint.handle()
        );

        while !state.is_done() {
            let index = state.next_index();

            if self.world.is_root() && index % interval == 0 {
                info!("Starting iteration {index}/{total}");
                self.reported += 1;
            }

            // everyone is in sync, including ranks that were just resumed
            self.enter(DriverState::PreBarrier);
            self.group.barrier()?;

            self.enter(DriverState::Executing);
            let context = IterationContext {
                world: &self.world,
                index,
                total,
            };
            self.workload
                .run(&context, self.group)
                .map_err(|error| RunError::from_workload(index, error))?;

            // nobody evaluates the checkpoint before every rank finished this iteration
            self.enter(DriverState::PostBarrier);
            self.group.barrier()?;

            state.advance();

            self.enter(DriverState::CheckpointEval);
            let token = checkpoint.evaluate(&state, &self.world);

            if token.remaining == 0 {
                continue;
            }

            if let MigrationOutcome::Migrated {
                host,
                token,
                token_path,
            } = self.scheduler.maybe_migrate(&token)?
            {
                self.enter(DriverState::Migrated);
                info!(
                    rank = self.world.rank,
                    remaining = token.remaining,
                    "Rank leaves {} for {host} after {} ms",
                    self.world.host,
                    start.elapsed().as_millis()
                );

                return Ok(RunOutcome::Migrated {
                    executed: state.completed() - first,
                    host,
                    token,
                    token_path,
                });
            }
        }

        info!(
            "Rank {} exiting the loop after {} ms",
            self.world.rank,
            start.elapsed().as_millis()
        );
        self.group.barrier()?;
        self.enter(DriverState::Completed);

        Ok(RunOutcome::Completed {
            executed: state.completed() - first,
        })
    }
}
