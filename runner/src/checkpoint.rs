pub mod store;

#[cfg(test)]
mod store_test;

use crate::{
    config::WorkloadConfig,
    world::{IterationState, WorldContext},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

/// Stable, serializable description of which computation a resumed rank re-enters
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case", deny_unknown_fields)]
pub enum ResumeHandle {
    /// restart the exchange loop body at index `total - remaining`
    AllToAll { chunk_size: usize },
    /// re-enter the chained computation, parameterized by `remaining`
    Chained { target: String },
}

impl ResumeHandle {
    pub fn id(&self) -> &'static str {
        match self {
            Self::AllToAll { .. } => "all-to-all",
            Self::Chained { .. } => "chained",
        }
    }
}

impl From<&WorkloadConfig> for ResumeHandle {
    fn from(config: &WorkloadConfig) -> Self {
        match config {
            WorkloadConfig::AllToAll { chunk_size } => Self::AllToAll {
                chunk_size: *chunk_size,
            },
            WorkloadConfig::Chained { target } => Self::Chained {
                target: target.clone(),
            },
        }
    }
}

impl From<&ResumeHandle> for WorkloadConfig {
    fn from(handle: &ResumeHandle) -> Self {
        match handle {
            ResumeHandle::AllToAll { chunk_size } => Self::AllToAll {
                chunk_size: *chunk_size,
            },
            ResumeHandle::Chained { target } => Self::Chained {
                target: target.clone(),
            },
        }
    }
}

impl fmt::Display for ResumeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllToAll { chunk_size } => write!(f, "all-to-all(chunk_size={chunk_size})"),
            Self::Chained { target } => write!(f, "chained({target})"),
        }
    }
}

/// Everything a relocated rank needs to continue the loop
///
/// Tokens are owned snapshots, the process that produced one may be gone by the
/// time it is consumed.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CheckpointToken {
    pub run_id: String,
    pub remaining: usize,
    pub total: usize,
    /// context of the instance that produced the token, a resumed rank rediscovers its own
    pub origin: WorldContext,
    pub handle: ResumeHandle,
    /// number of relocations that happened before this token was produced
    pub generation: u32,
}

impl CheckpointToken {
    /// global index of the first iteration a resumed rank executes
    pub fn next_index(&self) -> usize {
        self.total.saturating_sub(self.remaining)
    }

    /// the token a relocated instance starts from
    pub fn relocated(&self) -> Self {
        Self {
            generation: self.generation + 1,
            ..self.clone()
        }
    }
}

/// Per instance checkpoint context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationCheckpoint {
    run_id: String,
    handle: ResumeHandle,
    generation: u32,
}

impl MigrationCheckpoint {
    pub fn new(run_id: impl Into<String>, handle: ResumeHandle) -> Self {
        Self {
            run_id: run_id.into(),
            handle,
            generation: 0,
        }
    }

    /// context of an instance that was started from `token`
    pub fn resumed(token: &CheckpointToken) -> Self {
        Self {
            run_id: token.run_id.clone(),
            handle: token.handle.clone(),
            generation: token.generation,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn handle(&self) -> &ResumeHandle {
        &self.handle
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Snapshot the loop position after an iteration
    ///
    /// Pure, evaluating the same state twice yields the same token.
    pub fn evaluate(&self, state: &IterationState, world: &WorldContext) -> CheckpointToken {
        CheckpointToken {
            run_id: self.run_id.clone(),
            remaining: state.remaining(),
            total: state.total(),
            origin: world.clone(),
            handle: self.handle.clone(),
            generation: self.generation,
        }
    }
}

/// identifier for a new logical run
pub fn new_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();

    format!("run-{}-{millis}", std::process::id())
}
