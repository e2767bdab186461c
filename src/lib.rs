//! handoff - a hybrid checklist engine.
//!
//! A checklist is a tree of named tasks with prerequisites. The engine runs
//! every leaf task as soon as its prerequisites are DONE or SKIPPED, tries an
//! automation first, and hands the task to a human whenever automation is
//! missing, fails, or is cancelled. Every task stays completable with zero
//! automation.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use handoff::{
//!     AutomationRegistry, AutomationResolver, EngineSettings, Scheduler, ServicePool, TaskFile,
//! };
//!
//! let settings = EngineSettings::load("settings.yaml")?;
//! let graph = TaskFile::load_graph("broadcast.yaml", settings.placeholders())?;
//! let registry = AutomationRegistry::new().with(Arc::new(StartStream))?;
//! let resolver = AutomationResolver::new(registry, Arc::new(ServicePool::new()));
//!
//! let report = Scheduler::new(graph, resolver, Arc::new(my_ui))
//!     .with_settings(settings)
//!     .run()
//!     .await?;
//! println!("{} done, {} skipped", report.done_count(), report.skipped_count());
//! ```

pub mod automation;
pub mod config;
pub mod core;
pub mod execution;
pub mod messenger;
pub mod testing;

pub use automation::{
    Automation, AutomationContext, AutomationError, AutomationRegistry, AutomationResolver,
    InputSlot, Outcome, Resolution, ServicePool,
};
pub use config::{ConfigError, EngineSettings, TaskFile};
pub use core::cancel::{CancelState, CancellationToken, Cancelled, sleep_attentively};
pub use core::definition::TaskDefinition;
pub use core::graph::{GraphError, GraphLoader, Placeholders, TaskGraph, TaskNode};
pub use core::retry::RetryPolicy;
pub use core::status::{Problem, ProblemLevel, TaskStatus, UserResponse};
pub use core::types::{ProgressKey, RequestKey, RunId, TaskId};
pub use execution::{ExecutionError, RunHandle, RunReport, Scheduler, TaskReport};
pub use messenger::{
    ChannelMessenger, ChoiceRequest, ConfirmRequest, InvalidInput, ListChoice, Messenger,
    MessengerError, MessengerEvent, Parameter, ProgressBar, Reply, TaskMessenger,
};
