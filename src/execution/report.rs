//! Run reports.

use std::time::Duration;

use serde::Serialize;

use crate::core::status::{Problem, TaskStatus};
use crate::core::types::{RunId, TaskId};

/// Final (or snapshot) state of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task: TaskId,
    /// 1-based leaf index. `None` for composites.
    pub index: Option<usize>,
    pub is_leaf: bool,
    pub status: TaskStatus,
    /// Number of attempts started. 0 if never dispatched.
    pub attempts: u32,
    pub problems: Vec<Problem>,
}

/// Result of executing a checklist.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    /// Total duration of the run.
    pub duration: Duration,
    /// Whether the run was aborted through its handle.
    pub aborted: bool,
    /// The FATAL problem that halted the run, if any.
    pub fatal: Option<Problem>,
    /// Every task in pre-order.
    pub tasks: Vec<TaskReport>,
    /// Problems not tied to a task.
    pub run_problems: Vec<Problem>,
}

impl RunReport {
    /// Get the report for a specific task.
    pub fn task(&self, id: &TaskId) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| &t.task == id)
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.task(id).map(|t| t.status)
    }

    /// Problems raised by a task. Empty for unknown tasks.
    pub fn problems(&self, id: &TaskId) -> &[Problem] {
        self.task(id).map(|t| t.problems.as_slice()).unwrap_or(&[])
    }

    /// Every problem in the run, task problems first.
    pub fn all_problems(&self) -> impl Iterator<Item = &Problem> {
        self.tasks
            .iter()
            .flat_map(|t| t.problems.iter())
            .chain(self.run_problems.iter())
    }

    /// Number of leaf tasks completed.
    pub fn done_count(&self) -> usize {
        self.leaves()
            .filter(|t| t.status == TaskStatus::Done)
            .count()
    }

    /// Number of leaf tasks skipped.
    pub fn skipped_count(&self) -> usize {
        self.leaves()
            .filter(|t| t.status == TaskStatus::Skipped)
            .count()
    }

    /// Leaf tasks that did not reach a terminal status, in index order.
    pub fn unfinished(&self) -> Vec<&TaskId> {
        let mut leaves: Vec<&TaskReport> = self
            .leaves()
            .filter(|t| !t.status.is_terminal())
            .collect();
        leaves.sort_by_key(|t| t.index);
        leaves.into_iter().map(|t| &t.task).collect()
    }

    /// Whether every leaf task is Done or Skipped.
    pub fn is_complete(&self) -> bool {
        self.leaves().all(|t| t.status.is_terminal())
    }

    fn leaves(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|t| t.is_leaf)
    }
}
