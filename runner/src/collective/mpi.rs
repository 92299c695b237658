use super::{check_send_buffer, CollectiveError, CollectiveGroup};
use mpi::{environment::Universe, topology::SimpleCommunicator, traits::*};
use tracing::{debug, error};

/// MPI world communicator, finalized when dropped
pub struct MpiGroup {
    world: SimpleCommunicator,
    _universe: Universe,
}

impl MpiGroup {
    pub fn init() -> Result<Self, CollectiveError> {
        let universe = mpi::initialize().ok_or_else(|| {
            CollectiveError::Initialization("MPI was already initialized or failed to start".into())
        })?;
        let world = universe.world();

        debug!(rank = world.rank(), size = world.size(), "Joined MPI world");

        Ok(Self {
            world,
            _universe: universe,
        })
    }
}

impl std::fmt::Debug for MpiGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpiGroup")
            .field("rank", &self.world.rank())
            .field("size", &self.world.size())
            .finish()
    }
}

impl CollectiveGroup for MpiGroup {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn world_size(&self) -> usize {
        self.world.size() as usize
    }

    fn barrier(&self) -> Result<(), CollectiveError> {
        self.world.barrier();

        Ok(())
    }

    fn all_to_all(&self, send: &[i32], chunk_size: usize) -> Result<Vec<i32>, CollectiveError> {
        check_send_buffer(send, chunk_size, self.world_size())?;

        let mut received = vec![0i32; send.len()];
        self.world.all_to_all_into(send, &mut received[..]);

        Ok(received)
    }

    fn abandon(&self) {
        error!(rank = self.rank(), "Aborting MPI world after a fatal error on this rank");

        self.world.abort(1)
    }
}
