pub mod local;
#[cfg(feature = "mpi")]
pub mod mpi;


use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectiveError {
    #[error("Collective substrate failed to initialize: {0}")]
    Initialization(String),
    #[error("A peer abandoned the group while rank {rank} was waiting")]
    Abandoned { rank: usize },
    #[error("All-to-all send buffer holds {actual} elements, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
}

/// Minimal view of the collective substrate the driver relies on
///
/// Every operation is a symmetric rendezvous: all ranks of the group must
/// call it, otherwise the group stalls.
pub trait CollectiveGroup {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// block until every rank reached the barrier
    fn barrier(&self) -> Result<(), CollectiveError>;

    /// send `chunk_size` elements to every peer and receive `chunk_size` from each
    ///
    /// `send` holds `chunk_size * world_size` elements, chunk `p` is addressed to rank `p`.
    /// The result is ordered by source rank.
    fn all_to_all(&self, send: &[i32], chunk_size: usize) -> Result<Vec<i32>, CollectiveError>;

    /// signal peers that this rank will not reach any further rendezvous
    fn abandon(&self);
}

/// check the shape of an all-to-all send buffer
pub(crate) fn check_send_buffer(
    send: &[i32],
    chunk_size: usize,
    world_size: usize,
) -> Result<(), CollectiveError> {
    let expected = chunk_size * world_size;

    if send.len() != expected {
        Err(CollectiveError::BufferSize {
            expected,
            actual: send.len(),
        })
    } else {
        Ok(())
    }
}
