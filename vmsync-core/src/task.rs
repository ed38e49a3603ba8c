//! Tracking of asynchronous backend operations to a terminal outcome.
//!
//! Task handles never survive a reconcile invocation. An invocation that
//! times out waiting reports "not yet converged" and the next invocation
//! re-observes backend reality instead of re-attaching to the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{Backend, TaskRef, TaskState};
use crate::error::Result;

/// Terminal outcome of awaiting a backend task.
///
/// `TimedOut` is not a definitive failure: the underlying operation may
/// still complete later. `Cancelled` means the invocation's deadline
/// fired; the in-flight backend operation is not cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failure(String),
    TimedOut,
    Cancelled,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success)
    }
}

/// One outstanding asynchronous backend operation, owned by the
/// invocation that submitted it.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task: TaskRef,
    submitted_at: Instant,
}

impl TaskHandle {
    pub(crate) fn new(task: TaskRef) -> Self {
        Self {
            task,
            submitted_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

/// Polls backend task status at a bounded interval until a terminal
/// state, the wait budget, or cancellation.
pub struct TaskTracker {
    backend: Arc<dyn Backend>,
    poll_interval: Duration,
}

impl TaskTracker {
    pub fn new(backend: Arc<dyn Backend>, poll_interval: Duration) -> Self {
        Self {
            backend,
            poll_interval,
        }
    }

    /// Cooperatively wait for the task. Yields between polls; honors
    /// `cancel` promptly. A transport failure of the status call itself
    /// propagates as an error - the task may still be running.
    pub async fn await_task(
        &self,
        handle: &TaskHandle,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let deadline = Instant::now() + budget;
        loop {
            match self.backend.task_state(&handle.task).await? {
                TaskState::Success => {
                    debug!(
                        task = %handle.task.id,
                        kind = %handle.task.kind,
                        elapsed = ?handle.elapsed(),
                        "task finished"
                    );
                    return Ok(TaskOutcome::Success);
                }
                TaskState::Error(reason) => {
                    warn!(
                        task = %handle.task.id,
                        kind = %handle.task.kind,
                        reason = %reason,
                        "task failed"
                    );
                    return Ok(TaskOutcome::Failure(reason));
                }
                TaskState::Running => {}
            }

            if Instant::now() >= deadline {
                warn!(
                    task = %handle.task.id,
                    kind = %handle.task.kind,
                    budget = ?budget,
                    "task still running after wait budget"
                );
                return Ok(TaskOutcome::TimedOut);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(TaskOutcome::Cancelled),
                _ = sleep(self.poll_interval) => {}
            }
        }
    }
}
