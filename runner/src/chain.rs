pub mod process;


use thiserror::Error;

/// Identifier handed out by `ChainRuntime::submit`
pub type CallId = u64;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Chained target '{0}' is not registered")]
    UnknownTarget(String),
    #[error("Call {0} was never submitted or was already awaited")]
    UnknownCall(CallId),
    #[error("Failed to spawn chained call for '{target}'")]
    Spawn {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to wait for chained call {call_id}")]
    Wait {
        call_id: CallId,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Failed(i32),
    TimedOut,
}

/// Outcome of an awaited chained call
#[derive(Debug, Clone)]
pub struct ChainResult {
    pub call_id: CallId,
    pub status: CallStatus,
    pub output: String,
}

impl ChainResult {
    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }
}

/// Invocation runtime for independently deployed computations
pub trait ChainRuntime {
    /// start the computation registered under `target` without waiting for it
    fn submit(&mut self, target: &str) -> Result<CallId, ChainError>;

    /// block until the call finished
    fn await_call(&mut self, call_id: CallId) -> Result<ChainResult, ChainError>;
}
