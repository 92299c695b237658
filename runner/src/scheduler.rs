pub mod planned;


use crate::{
    checkpoint::{store::HandoffError, CheckpointToken},
    config::MigrationConfig,
};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to hand off the checkpoint token")]
    Handoff(#[from] HandoffError),
    #[error("Failed to relaunch rank on {host} with {command:?}")]
    Relaunch {
        host: String,
        command: Vec<String>,
        #[source]
        source: std::io::Error,
    },
}

/// Decision taken at a checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// continue the loop in this process
    Stay,
    /// the rank continues elsewhere from `token`, this process instance is done
    Migrated {
        host: String,
        token: CheckpointToken,
        token_path: PathBuf,
    },
}

pub trait MigrationScheduler {
    fn maybe_migrate(&mut self, token: &CheckpointToken)
        -> Result<MigrationOutcome, MigrationError>;
}

impl<S: MigrationScheduler + ?Sized> MigrationScheduler for &mut S {
    fn maybe_migrate(
        &mut self,
        token: &CheckpointToken,
    ) -> Result<MigrationOutcome, MigrationError> {
        (**self).maybe_migrate(token)
    }
}

/// All schedulers the runner ships with
#[derive(Debug, Clone)]
pub enum MigrationSchedulers {
    Never,
    Planned(planned::PlannedScheduler),
}

impl MigrationSchedulers {
    pub fn load(config: &MigrationConfig) -> Self {
        if config.plan.is_empty() {
            Self::Never
        } else {
            Self::Planned(planned::PlannedScheduler::load(config))
        }
    }
}

impl MigrationScheduler for MigrationSchedulers {
    fn maybe_migrate(
        &mut self,
        token: &CheckpointToken,
    ) -> Result<MigrationOutcome, MigrationError> {
        match self {
            Self::Never => Ok(MigrationOutcome::Stay),
            Self::Planned(scheduler) => scheduler.maybe_migrate(token),
        }
    }
}
