use super::{check_send_buffer, CollectiveError, CollectiveGroup};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct Rendezvous {
    arrived: usize,
    generation: u64,
    abandoned: bool,
    // one deposited send buffer per rank, only read between the two barriers of an exchange
    slots: Vec<Vec<i32>>,
}

#[derive(Debug)]
struct Shared {
    world_size: usize,
    state: Mutex<Rendezvous>,
    arrival: Condvar,
}

/// In-process group where every rank is a thread holding its own handle
#[derive(Debug, Clone)]
pub struct LocalGroup {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalGroup {
    /// create a group of `world_size` ranks and return one handle per rank, ordered by rank
    pub fn new(world_size: usize) -> Result<Vec<Self>, CollectiveError> {
        if world_size == 0 {
            return Err(CollectiveError::Initialization(
                "a local group needs at least one rank".to_string(),
            ));
        }

        let shared = Arc::new(Shared {
            world_size,
            state: Mutex::new(Rendezvous {
                arrived: 0,
                generation: 0,
                abandoned: false,
                slots: vec![Vec::new(); world_size],
            }),
            arrival: Condvar::new(),
        });

        debug!(world_size, "Created local group");

        Ok((0..world_size)
            .map(|rank| Self {
                rank,
                shared: shared.clone(),
            })
            .collect())
    }

    /// a new handle for the same rank, used by a rank that was recreated after migrating
    pub fn rejoin(&self) -> Self {
        Self {
            rank: self.rank,
            shared: self.shared.clone(),
        }
    }
}

impl CollectiveGroup for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.shared.world_size
    }

    fn barrier(&self) -> Result<(), CollectiveError> {
        let mut state = self.shared.state.lock();

        if state.abandoned {
            return Err(CollectiveError::Abandoned { rank: self.rank });
        }

        state.arrived += 1;

        if state.arrived == self.shared.world_size {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            trace!(rank = self.rank, generation = state.generation, "Barrier released");
            self.shared.arrival.notify_all();

            return Ok(());
        }

        let generation = state.generation;

        while state.generation == generation && !state.abandoned {
            self.shared.arrival.wait(&mut state);
        }

        if state.generation == generation {
            Err(CollectiveError::Abandoned { rank: self.rank })
        } else {
            Ok(())
        }
    }

    fn all_to_all(&self, send: &[i32], chunk_size: usize) -> Result<Vec<i32>, CollectiveError> {
        let world_size = self.shared.world_size;
        check_send_buffer(send, chunk_size, world_size)?;

        self.shared.state.lock().slots[self.rank] = send.to_vec();

        // every rank deposited its buffer
        self.barrier()?;

        let received = {
            let state = self.shared.state.lock();
            let offset = self.rank * chunk_size;
            let mut received = Vec::with_capacity(send.len());

            for slot in state.slots.iter() {
                match slot.get(offset..offset + chunk_size) {
                    Some(chunk) => received.extend_from_slice(chunk),
                    // a peer used a different chunk size
                    None => {
                        return Err(CollectiveError::BufferSize {
                            expected: send.len(),
                            actual: slot.len(),
                        })
                    }
                }
            }

            received
        };

        // nobody overwrites its slot before every rank copied its chunks
        self.barrier()?;

        Ok(received)
    }

    fn abandon(&self) {
        let mut state = self.shared.state.lock();

        if !state.abandoned {
            warn!(rank = self.rank, "Rank abandoned the local group, waking all peers");
            state.abandoned = true;
            self.shared.arrival.notify_all();
        }
    }
}
