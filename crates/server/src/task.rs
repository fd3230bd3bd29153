//! Bounded-time execution of blocking operations
//!
//! Runs a blocking operation on a dedicated worker thread and waits for it at
//! most until a deadline. The worker is never forcibly stopped: on timeout it is
//! abandoned and whatever it eventually produces is dropped. Until it finishes
//! on its own, the resources it holds (memory, file handles, the thread itself)
//! stay allocated. Operations that want to stop early can poll the
//! [`CancellationToken`] they are handed, which is tripped on timeout.

use llmserve_common::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError};
use tracing::{debug, warn};

/// Cooperative cancellation flag shared between the caller and the worker
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Outcome of a bounded-time run
#[derive(Debug)]
pub enum TaskOutcome<T, E> {
    /// The operation finished before the deadline and succeeded
    Completed(T),

    /// The operation finished before the deadline and failed
    Failed(E),

    /// The deadline elapsed first; the worker was abandoned
    TimedOut,

    /// The worker panicked before producing a result
    Panicked,
}

/// Run `operation` on a named worker thread, blocking the caller for at most
/// `deadline`.
///
/// Returns an error only if the worker thread could not be spawned.
pub fn run_with_deadline<T, E, F>(
    name: &str,
    deadline: Duration,
    operation: F,
) -> Result<TaskOutcome<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
    F: FnOnce(CancellationToken) -> std::result::Result<T, E> + Send + 'static,
{
    // Capacity 1 so the worker never blocks on send, even after we stop listening
    let (tx, rx) = channel::bounded(1);
    let token = CancellationToken::new();
    let worker_token = token.clone();
    let task_name = name.to_string();

    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let outcome = operation(worker_token);
            if tx.send(outcome).is_err() {
                debug!("Task {} finished after its caller gave up, result discarded", task_name);
            }
        })?;

    match rx.recv_timeout(deadline) {
        Ok(Ok(value)) => Ok(TaskOutcome::Completed(value)),
        Ok(Err(err)) => Ok(TaskOutcome::Failed(err)),
        Err(RecvTimeoutError::Timeout) => {
            token.cancel();
            warn!(
                "Task {} exceeded its {:?} deadline, abandoning worker thread",
                name, deadline
            );
            Ok(TaskOutcome::TimedOut)
        }
        Err(RecvTimeoutError::Disconnected) => {
            warn!("Task {} worker exited without a result", name);
            Ok(TaskOutcome::Panicked)
        }
    }
}
