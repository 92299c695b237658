use crate::collective::CollectiveGroup;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Identity of this rank inside the group, only valid for the current process instance
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorldContext {
    pub rank: usize,
    pub world_size: usize,
    pub host: String,
}

impl WorldContext {
    /// rediscover rank and size from a freshly joined group, host is taken from the node name
    pub fn discover<G: CollectiveGroup>(group: &G) -> Self {
        Self::on_host(group, local_hostname())
    }

    /// same as `discover`, but for a rank that is known to live on `host`
    pub fn on_host<G: CollectiveGroup>(group: &G, host: impl Into<String>) -> Self {
        Self {
            rank: group.rank(),
            world_size: group.world_size(),
            host: host.into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }
}

pub fn local_hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(hostname) => hostname.to_string_lossy().into_owned(),
        Err(error) => {
            warn!(error = ?error, "Failed to retrieve hostname, falling back to localhost");

            String::from("localhost")
        }
    }
}

/// Loop position of a single process instance
///
/// `completed + remaining == total` holds after every public operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IterationState {
    total: usize,
    completed: usize,
    remaining: usize,
}

impl IterationState {
    /// fresh state for a run that has not executed anything yet
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            remaining: total,
        }
    }

    /// state re-created from a checkpoint, `remaining` is clamped to `total`
    pub fn resumed(total: usize, remaining: usize) -> Self {
        let remaining = remaining.min(total);

        Self {
            total,
            completed: total - remaining,
            remaining,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// global index of the iteration that runs next
    pub fn next_index(&self) -> usize {
        self.completed
    }

    pub fn is_done(&self) -> bool {
        self.remaining == 0
    }

    /// mark one iteration as done, a no-op once nothing remains
    pub fn advance(&mut self) {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.completed += 1;
        }
    }
}
