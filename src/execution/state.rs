//! Shared status table for one run.
//!
//! All task state lives behind a single mutex that is never held across an
//! `.await`. Every change bumps a `watch` counter so the driver (and any
//! host subscribed through a [`RunHandle`](super::RunHandle)) wakes up
//! instead of polling.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::watch;

use super::report::{RunReport, TaskReport};
use crate::core::cancel::CancellationToken;
use crate::core::graph::TaskGraph;
use crate::core::status::{Problem, TaskStatus};
use crate::core::types::{RunId, TaskId};

#[derive(Debug, Default)]
struct TaskEntry {
    status: TaskStatus,
    attempts: u32,
    problems: Vec<Problem>,
}

#[derive(Debug, Default)]
struct StatusTable {
    tasks: HashMap<TaskId, TaskEntry>,
    run_problems: Vec<Problem>,
    fatal: Option<Problem>,
    aborted: bool,
}

impl StatusTable {
    fn entry(&mut self, id: &TaskId) -> &mut TaskEntry {
        self.tasks.entry(id.clone()).or_default()
    }

    fn is_terminal(&self, id: &TaskId) -> bool {
        self.tasks.get(id).is_some_and(|e| e.status.is_terminal())
    }
}

pub(crate) struct RunState {
    run_id: RunId,
    graph: Arc<TaskGraph>,
    table: Mutex<StatusTable>,
    changes: watch::Sender<u64>,
    run_token: CancellationToken,
    started: Instant,
}

impl RunState {
    pub(crate) fn new(run_id: RunId, graph: Arc<TaskGraph>, run_token: CancellationToken) -> Self {
        let tasks = graph
            .nodes()
            .map(|node| (node.id().clone(), TaskEntry::default()))
            .collect();
        let (changes, _) = watch::channel(0);
        Self {
            run_id,
            graph,
            table: Mutex::new(StatusTable {
                tasks,
                ..StatusTable::default()
            }),
            changes,
            run_token,
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatusTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub(crate) fn run_token(&self) -> &CancellationToken {
        &self.run_token
    }

    /// Whether dispatch has stopped, by abort or by a run-level FATAL.
    pub(crate) fn is_halted(&self) -> bool {
        self.run_token.is_cancelled()
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    pub(crate) fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.lock().tasks.get(id).map(|e| e.status)
    }

    pub(crate) fn attempts(&self, id: &TaskId) -> u32 {
        self.lock().tasks.get(id).map_or(0, |e| e.attempts)
    }

    /// Move a dispatched leaf to RUNNING for its first attempt.
    pub(crate) fn begin(&self, id: &TaskId) {
        {
            let mut table = self.lock();
            let entry = table.entry(id);
            entry.status = TaskStatus::Running;
            entry.attempts = 1;
        }
        self.notify();
    }

    pub(crate) fn set_status(&self, id: &TaskId, status: TaskStatus) {
        self.lock().entry(id).status = status;
        self.notify();
    }

    /// Back to RUNNING for another attempt. Returns the new attempt count.
    pub(crate) fn retry(&self, id: &TaskId) -> u32 {
        let attempts = {
            let mut table = self.lock();
            let entry = table.entry(id);
            entry.status = TaskStatus::Running;
            entry.attempts += 1;
            entry.attempts
        };
        self.notify();
        attempts
    }

    /// Commit a leaf's terminal status and derive its ancestors.
    ///
    /// Returns the composites that became DONE, nearest first. They are
    /// derived under the same lock, so no reader sees a finished leaf set
    /// under a composite that is not DONE.
    pub(crate) fn commit_terminal(&self, id: &TaskId, status: TaskStatus) -> Vec<TaskId> {
        let completed = self.complete(&mut self.lock(), id, status);
        self.notify();
        completed
    }

    /// Apply a status an automation reported for its own task.
    ///
    /// A terminal report is committed like [`commit_terminal`](Self::commit_terminal)
    /// and returns the composites that became DONE. Returns `None` and
    /// leaves the table untouched for composites and for NOT_STARTED. A
    /// leaf that is already terminal never changes either.
    pub(crate) fn apply_reported(&self, id: &TaskId, status: TaskStatus) -> Option<Vec<TaskId>> {
        if !self.graph.get(id).is_some_and(|node| node.is_leaf())
            || status == TaskStatus::NotStarted
        {
            return None;
        }
        let completed = {
            let mut table = self.lock();
            if table.is_terminal(id) {
                return None;
            }
            if status.is_terminal() {
                self.complete(&mut table, id, status)
            } else {
                table.entry(id).status = status;
                Vec::new()
            }
        };
        self.notify();
        Some(completed)
    }

    fn complete(&self, table: &mut StatusTable, id: &TaskId, status: TaskStatus) -> Vec<TaskId> {
        let mut completed = Vec::new();
        table.entry(id).status = status;

        for ancestor in self.graph.ancestors(id) {
            let Some(node) = self.graph.get(&ancestor) else {
                continue;
            };
            if !node.leaves().iter().all(|leaf| table.is_terminal(leaf)) {
                break;
            }
            let entry = table.entry(&ancestor);
            if entry.status != TaskStatus::Done {
                entry.status = TaskStatus::Done;
                completed.push(ancestor);
            }
        }
        completed
    }

    pub(crate) fn record_problem(&self, problem: Problem) {
        let mut table = self.lock();
        match problem.task.clone() {
            Some(task) => table.entry(&task).problems.push(problem),
            None => table.run_problems.push(problem),
        }
    }

    /// Record a run-level FATAL and stop the run.
    ///
    /// Only the first FATAL is kept as the cause; later ones are still
    /// recorded as problems.
    pub(crate) fn fail_run(&self, problem: Problem) {
        {
            let mut table = self.lock();
            if table.fatal.is_none() {
                table.fatal = Some(problem.clone());
            }
            match problem.task.clone() {
                Some(task) => table.entry(&task).problems.push(problem),
                None => table.run_problems.push(problem),
            }
        }
        self.run_token.cancel();
        self.notify();
    }

    pub(crate) fn abort(&self) {
        self.lock().aborted = true;
        self.run_token.cancel();
        self.notify();
    }

    /// Leaves whose prerequisites are all terminal and that have not been
    /// dispatched yet, in index order.
    pub(crate) fn ready_leaves(&self, dispatched: &HashSet<TaskId>) -> Vec<TaskId> {
        let table = self.lock();
        self.graph
            .leaves()
            .filter(|node| !dispatched.contains(node.id()))
            .filter(|node| {
                table
                    .tasks
                    .get(node.id())
                    .is_none_or(|e| e.status == TaskStatus::NotStarted)
            })
            .filter(|node| {
                node.effective_prerequisites()
                    .iter()
                    .all(|prerequisite| table.is_terminal(prerequisite))
            })
            .map(|node| node.id().clone())
            .collect()
    }

    pub(crate) fn snapshot(&self) -> RunReport {
        let table = self.lock();
        let tasks = self
            .graph
            .nodes()
            .map(|node| {
                let entry = table.tasks.get(node.id());
                TaskReport {
                    task: node.id().clone(),
                    index: node.index(),
                    is_leaf: node.is_leaf(),
                    status: entry.map_or(TaskStatus::NotStarted, |e| e.status),
                    attempts: entry.map_or(0, |e| e.attempts),
                    problems: entry.map(|e| e.problems.clone()).unwrap_or_default(),
                }
            })
            .collect();

        RunReport {
            run_id: self.run_id,
            duration: self.started.elapsed(),
            aborted: table.aborted,
            fatal: table.fatal.clone(),
            tasks,
            run_problems: table.run_problems.clone(),
        }
    }
}
