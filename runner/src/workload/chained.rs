use super::{IterationContext, Workload, WorkloadError, WorkloadResult};
use crate::{chain::ChainRuntime, collective::CollectiveGroup};
use tracing::{debug, warn};

/// Dispatches one externally defined step per iteration and waits for it
#[derive(Debug)]
pub struct ChainedWorkload<R: ChainRuntime> {
    target: String,
    runtime: R,
}

impl<R: ChainRuntime> ChainedWorkload<R> {
    pub fn new(target: String, runtime: R) -> Self {
        Self { target, runtime }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl<R: ChainRuntime> Workload for ChainedWorkload<R> {
    #[tracing::instrument(
        level = "debug",
        skip(self, context, _group),
        fields(index = context.index)
    )]
    fn run<G: CollectiveGroup>(
        &mut self,
        context: &IterationContext,
        _group: &G,
    ) -> Result<WorkloadResult, WorkloadError> {
        let call_id = self.runtime.submit(&self.target)?;
        debug!(call_id, "Waiting for chained call to {}", self.target);

        // the only point where a rank suspends outside of a rendezvous
        let result = self.runtime.await_call(call_id)?;

        if result.is_success() {
            Ok(WorkloadResult {
                ok: true,
                payload: Some(result.output),
            })
        } else {
            warn!(call_id, status = ?result.status, "Chained call to {} failed", self.target);

            Err(WorkloadError::Failed {
                call_id,
                status: result.status,
            })
        }
    }
}
