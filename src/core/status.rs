//! Task statuses, human responses, and problems.
//!
//! A leaf task moves `NotStarted -> Running -> {Done, Skipped}`, with a
//! `Running <-> WaitingForUser` cycle while an action item is open. A
//! composite task only ever reports `NotStarted` or `Done`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::TaskId;

/// Status of a task within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// The task has not been dispatched yet.
    #[default]
    NotStarted,
    /// The task was dispatched and its automation (if any) is running.
    Running,
    /// An action item is open and the task is waiting on a human.
    WaitingForUser,
    /// Completed, automatically or manually.
    Done,
    /// Skipped by a human. Satisfies prerequisites exactly like `Done`.
    Skipped,
}

impl TaskStatus {
    /// Whether this status satisfies downstream prerequisites.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Skipped)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::NotStarted => "NOT_STARTED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::WaitingForUser => "WAITING_FOR_USER",
            TaskStatus::Done => "DONE",
            TaskStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// A human's answer to an action item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserResponse {
    /// The task has been completed manually.
    Done,
    /// Run the automation again.
    Retry,
    /// The task will not be completed.
    Skip,
}

impl fmt::Display for UserResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UserResponse::Done => "DONE",
            UserResponse::Retry => "RETRY",
            UserResponse::Skip => "SKIP",
        };
        f.write_str(s)
    }
}

/// Severity of a [`Problem`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProblemLevel {
    /// Something may be off, but the task can continue.
    Warn,
    /// The current attempt cannot complete; a human takes over.
    Error,
    /// Continuing is meaningless.
    Fatal,
}

impl fmt::Display for ProblemLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProblemLevel::Warn => "WARN",
            ProblemLevel::Error => "ERROR",
            ProblemLevel::Fatal => "FATAL",
        };
        f.write_str(s)
    }
}

/// A problem raised while loading or running a checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub level: ProblemLevel,
    pub message: String,
    /// Cause chain or other detail, if any.
    pub cause: Option<String>,
    /// Task the problem belongs to. `None` for run-level problems.
    pub task: Option<TaskId>,
    pub raised_at: DateTime<Utc>,
}

impl Problem {
    pub fn new(level: ProblemLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            cause: None,
            task: None,
            raised_at: Utc::now(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(ProblemLevel::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ProblemLevel::Error, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ProblemLevel::Fatal, message)
    }

    /// Builder: attach cause detail.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Builder: associate with a task.
    pub fn for_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.level == ProblemLevel::Fatal
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task {
            Some(task) => write!(f, "[{}] [{}] {}", self.level, task, self.message)?,
            None => write!(f, "[{}] {}", self.level, self.message)?,
        }
        if let Some(cause) = &self.cause {
            write!(f, " (cause: {})", cause)?;
        }
        Ok(())
    }
}
