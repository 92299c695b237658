use super::{CallId, CallStatus, ChainError, ChainResult, ChainRuntime};
use crate::config::ChainTarget;
use std::{
    collections::BTreeMap,
    io::Read,
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

#[derive(Debug)]
struct PendingCall {
    target: String,
    child: Child,
    output: Option<JoinHandle<String>>,
    timeout: Duration,
    started: Instant,
}

/// Chain runtime that launches every registered target as a local child process
#[derive(Debug)]
pub struct ProcessChain {
    targets: BTreeMap<String, ChainTarget>,
    pending: BTreeMap<CallId, PendingCall>,
    next_id: CallId,
}

impl ProcessChain {
    pub fn new(targets: BTreeMap<String, ChainTarget>) -> Self {
        Self {
            targets,
            pending: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl ChainRuntime for ProcessChain {
    fn submit(&mut self, target: &str) -> Result<CallId, ChainError> {
        let config = self
            .targets
            .get(target)
            .ok_or_else(|| ChainError::UnknownTarget(target.to_string()))?;

        let mut child = Command::new(&config.exec)
            .args(config.params.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ChainError::Spawn {
                target: target.to_string(),
                source,
            })?;

        // drain stdout concurrently, a full pipe would otherwise block the child forever
        let output = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut buffer = String::new();

                if let Err(error) = stdout.read_to_string(&mut buffer) {
                    warn!(error = ?error, "Failed to read output of chained call");
                }

                buffer
            })
        });

        let call_id = self.next_id;
        self.next_id += 1;

        debug!(call_id, chain_target = target, pid = child.id(), "Submitted chained call");

        self.pending.insert(
            call_id,
            PendingCall {
                target: target.to_string(),
                child,
                output,
                timeout: Duration::from_secs(config.timeout),
                started: Instant::now(),
            },
        );

        Ok(call_id)
    }

    fn await_call(&mut self, call_id: CallId) -> Result<ChainResult, ChainError> {
        let mut call = self
            .pending
            .remove(&call_id)
            .ok_or(ChainError::UnknownCall(call_id))?;

        let status = match call
            .child
            .wait_timeout(call.timeout)
            .map_err(|source| ChainError::Wait { call_id, source })?
        {
            Some(status) if status.success() => CallStatus::Success,
            // killed by a signal if there is no code
            Some(status) => CallStatus::Failed(status.code().unwrap_or(-1)),
            None => {
                warn!(
                    call_id,
                    chain_target = %call.target,
                    "Chained call ran into its timeout of {}s, killing it",
                    call.timeout.as_secs()
                );

                if let Err(error) = call.child.kill() {
                    warn!(error = ?error, call_id, "Failed to kill timed out chained call");
                }
                call.child
                    .wait()
                    .map_err(|source| ChainError::Wait { call_id, source })?;

                CallStatus::TimedOut
            }
        };

        let output = match call.output.take().map(JoinHandle::join) {
            Some(Ok(output)) => output,
            Some(Err(_)) => {
                warn!(call_id, "Output reader of chained call panicked");
                String::new()
            }
            None => String::new(),
        };

        debug!(
            call_id,
            chain_target = %call.target,
            status = ?status,
            "Finished in {} ns",
            call.started.elapsed().as_nanos()
        );
        trace!("Output: {output}");

        Ok(ChainResult {
            call_id,
            status,
            output,
        })
    }
}
