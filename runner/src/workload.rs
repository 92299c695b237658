pub mod all_to_all;
pub mod chained;

#[cfg(test)]
mod all_to_all_test;

use crate::{
    chain::{process::ProcessChain, CallId, CallStatus, ChainError},
    collective::{CollectiveError, CollectiveGroup},
    config::{ChainConfig, WorkloadConfig},
    world::WorldContext,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkloadError {
    #[error("Collective operation failed")]
    Collective(#[from] CollectiveError),
    #[error("All-to-all result diverged on rank {rank} at slot {slot}: expected {expected}, got {actual}")]
    Mismatch {
        rank: usize,
        slot: usize,
        expected: i32,
        actual: i32,
    },
    #[error("Chained call could not be dispatched")]
    Chain(#[from] ChainError),
    #[error("Chained call {call_id} finished with {status:?}")]
    Failed { call_id: CallId, status: CallStatus },
}

/// Position of the iteration a workload is asked to execute
#[derive(Debug, Clone, Copy)]
pub struct IterationContext<'a> {
    pub world: &'a WorldContext,
    /// global index, stable across migrations
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadResult {
    pub ok: bool,
    /// opaque to the driver
    pub payload: Option<String>,
}

impl WorkloadResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            payload: None,
        }
    }
}

/// One unit of per iteration work
pub trait Workload {
    fn run<G: CollectiveGroup>(
        &mut self,
        context: &IterationContext,
        group: &G,
    ) -> Result<WorkloadResult, WorkloadError>;
}

/// All workloads the runner ships with
#[derive(Debug)]
pub enum Workloads {
    AllToAll(all_to_all::AllToAllWorkload),
    Chained(chained::ChainedWorkload<ProcessChain>),
}

impl Workloads {
    pub fn load(config: &WorkloadConfig, chain: &ChainConfig) -> Self {
        match config {
            WorkloadConfig::AllToAll { chunk_size } => {
                Self::AllToAll(all_to_all::AllToAllWorkload::new(*chunk_size))
            }
            WorkloadConfig::Chained { target } => Self::Chained(chained::ChainedWorkload::new(
                target.clone(),
                ProcessChain::new(chain.targets.clone()),
            )),
        }
    }
}

impl Workload for Workloads {
    fn run<G: CollectiveGroup>(
        &mut self,
        context: &IterationContext,
        group: &G,
    ) -> Result<WorkloadResult, WorkloadError> {
        match self {
            Self::AllToAll(workload) => workload.run(context, group),
            Self::Chained(workload) => workload.run(context, group),
        }
    }
}
