//! Handle for observing and aborting a running checklist.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use super::report::RunReport;
use super::state::RunState;
use crate::core::status::TaskStatus;
use crate::core::types::{RunId, TaskId};

/// Handle for controlling a run started with
/// [`Scheduler::start`](super::Scheduler::start).
#[derive(Clone)]
pub struct RunHandle {
    run_id: RunId,
    state: Arc<RunState>,
}

impl RunHandle {
    pub(crate) fn new(run_id: RunId, state: Arc<RunState>) -> Self {
        Self { run_id, state }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Abort the run.
    ///
    /// Every outstanding task token is cancelled and no task that has not
    /// started yet will be dispatched. Tasks already DONE or SKIPPED keep
    /// their status.
    pub fn abort(&self) {
        if !self.state.is_aborted() {
            info!(run = %self.run_id, "run abort requested");
        }
        self.state.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.is_aborted()
    }

    /// Receiver that changes whenever any task's status changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.state.subscribe()
    }

    /// Current status of a task. `None` if the task does not exist.
    pub fn status(&self, task: &TaskId) -> Option<TaskStatus> {
        self.state.status(task)
    }

    /// Report of the run so far.
    pub fn snapshot(&self) -> RunReport {
        self.state.snapshot()
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("aborted", &self.state.is_aborted())
            .finish()
    }
}
