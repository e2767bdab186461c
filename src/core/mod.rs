//! Core domain types: identifiers, statuses, cancellation, and the task graph.

pub mod cancel;
pub mod definition;
pub mod graph;
pub mod retry;
pub mod status;
pub mod types;

pub use cancel::{
    CancelState, CancellationToken, Cancelled, DEFAULT_POLL_INTERVAL, sleep_attentively,
};
pub use definition::TaskDefinition;
pub use graph::{GraphError, GraphLoader, Placeholders, TaskGraph, TaskNode};
pub use retry::RetryPolicy;
pub use status::{Problem, ProblemLevel, TaskStatus, UserResponse};
pub use types::{ProgressKey, RequestKey, RunId, TaskId};
