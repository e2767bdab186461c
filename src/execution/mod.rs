//! Checklist execution engine.
//!
//! This module provides the scheduler that runs a task graph, the handle
//! used to observe or abort a run, and the report a run produces.

mod handle;
mod recorder;
mod report;
mod scheduler;
mod state;

pub use handle::RunHandle;
pub use report::{RunReport, TaskReport};
pub use scheduler::{ExecutionError, Scheduler};
