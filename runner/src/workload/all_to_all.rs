use super::{IterationContext, Workload, WorkloadError, WorkloadResult};
use crate::{collective::CollectiveGroup, world::WorldContext};
use tracing::{error, trace};

/// Buffers of a single self-verifying exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllToAllFrame {
    pub chunk_size: usize,
    pub send: Vec<i32>,
    pub expected: Vec<i32>,
    pub actual: Vec<i32>,
}

impl AllToAllFrame {
    pub fn new(world: &WorldContext, chunk_size: usize) -> Self {
        let full_size = world.world_size * chunk_size;
        let rank = world.rank as i32;
        let chunk = chunk_size as i32;

        let send = (0..full_size as i32).map(|i| rank * 10 + i).collect();

        // slot i is filled by rank i / chunk from its local offset rank * chunk + i % chunk
        let expected = (0..full_size as i32)
            .map(|i| (i / chunk) * 10 + rank * chunk + (i % chunk))
            .collect();

        Self {
            chunk_size,
            send,
            expected,
            actual: Vec::new(),
        }
    }

    pub fn exchange<G: CollectiveGroup>(&mut self, group: &G) -> Result<(), WorkloadError> {
        self.actual = group.all_to_all(&self.send, self.chunk_size)?;

        Ok(())
    }

    /// compare the received buffer with the expected mapping, reporting the first divergence
    pub fn verify(&self, rank: usize) -> Result<(), WorkloadError> {
        if self.actual.len() != self.expected.len() {
            return Err(WorkloadError::Mismatch {
                rank,
                slot: self.actual.len().min(self.expected.len()),
                expected: self.expected.len() as i32,
                actual: self.actual.len() as i32,
            });
        }

        match self
            .expected
            .iter()
            .zip(self.actual.iter())
            .position(|(expected, actual)| expected != actual)
        {
            Some(slot) => Err(WorkloadError::Mismatch {
                rank,
                slot,
                expected: self.expected[slot],
                actual: self.actual[slot],
            }),
            None => Ok(()),
        }
    }
}

/// Synthetic communication test, exchanges a fixed pattern every iteration
#[derive(Debug, Clone)]
pub struct AllToAllWorkload {
    chunk_size: usize,
}

impl AllToAllWorkload {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }
}

impl Workload for AllToAllWorkload {
    fn run<G: CollectiveGroup>(
        &mut self,
        context: &IterationContext,
        group: &G,
    ) -> Result<WorkloadResult, WorkloadError> {
        let mut frame = AllToAllFrame::new(context.world, self.chunk_size);
        frame.exchange(group)?;

        if let Err(mismatch) = frame.verify(context.world.rank) {
            error!(
                index = context.index,
                "Collective substrate returned a wrong buffer: {mismatch}"
            );

            return Err(mismatch);
        }

        trace!(index = context.index, rank = context.world.rank, "All-to-all verified");

        Ok(WorkloadResult::ok())
    }
}
