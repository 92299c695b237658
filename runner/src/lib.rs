//! Migration-aware iterative execution
//!
//! A fixed group of ranks runs a multi-iteration loop where every iteration is
//! fenced by two barriers. After each iteration a rank evaluates a checkpoint and
//! may be relocated; the relocated instance resumes from the carried `remaining`
//! count so the logical run executes every iteration index exactly once.

pub mod chain;
pub mod checkpoint;
pub mod cli;
pub mod collective;
pub mod config;
pub mod driver;
pub mod launch;
pub mod scheduler;
pub mod workload;
pub mod world;

#[cfg(test)]
mod config_test;

pub use checkpoint::{CheckpointToken, MigrationCheckpoint, ResumeHandle};
pub use collective::CollectiveGroup;
pub use config::RunnerConfig;
pub use driver::{IterationDriver, RunError, RunOutcome};
pub use scheduler::{MigrationOutcome, MigrationScheduler};
pub use workload::{Workload, WorkloadResult};
pub use world::{IterationState, WorldContext};
