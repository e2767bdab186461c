//! Automations: programmatic handlers that complete a task without a human.
//!
//! An [`Automation`] is registered under the name of the task it completes
//! and declares the service types it needs as [`InputSlot`]s. Before each
//! attempt the [`AutomationResolver`] checks those slots against the
//! [`ServicePool`]; a gap downgrades the task to manual instead of failing
//! the run.
//!
//! # Example
//!
//! ```ignore
//! use handoff::automation::{Automation, AutomationContext, AutomationError, InputSlot};
//! use async_trait::async_trait;
//!
//! struct StartStream;
//!
//! #[async_trait]
//! impl Automation for StartStream {
//!     fn task_name(&self) -> &str {
//!         "start_stream"
//!     }
//!
//!     fn requires(&self) -> Vec<InputSlot> {
//!         vec![InputSlot::of::<dyn StreamingApi>()]
//!     }
//!
//!     async fn run(&self, ctx: &AutomationContext) -> Result<(), AutomationError> {
//!         let api = ctx.service::<dyn StreamingApi>()?;
//!         api.start().await?;
//!         ctx.sleep(std::time::Duration::from_secs(10)).await?;
//!         api.check_live().await?;
//!         Ok(())
//!     }
//! }
//! ```

mod context;
mod registry;
mod resolver;
mod services;

pub use context::AutomationContext;
pub use registry::{AutomationRegistry, RegistryError};
pub use resolver::{AutomationResolver, Resolution, ResolvedAutomation};
pub use services::ServicePool;

use std::any::TypeId;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::cancel::{CancellationToken, Cancelled};
use crate::core::status::Problem;
use crate::messenger::{MessengerError, TaskMessenger};

/// Errors an automation may return.
///
/// Anything other than [`Cancelled`](AutomationError::Cancelled) hands the
/// task to a human.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// The attempt failed; a human can take over.
    #[error("{0}")]
    Failed(String),

    /// Retrying the automation is pointless.
    #[error("{0}")]
    Fatal(String),

    /// The attempt observed a cancellation request and stopped.
    #[error("the automation was cancelled")]
    Cancelled,

    /// The interaction channel failed.
    #[error("messenger error: {0}")]
    Messenger(MessengerError),

    /// A service the automation asked for is not in the pool.
    #[error("service '{0}' is not available")]
    MissingService(&'static str),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AutomationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Wrap any error, keeping its source chain.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(error))
    }
}

impl From<Cancelled> for AutomationError {
    fn from(_: Cancelled) -> Self {
        AutomationError::Cancelled
    }
}

impl From<MessengerError> for AutomationError {
    fn from(error: MessengerError) -> Self {
        match error {
            MessengerError::Cancelled => AutomationError::Cancelled,
            // The UI is fine; only this attempt cannot go on.
            unsupported @ MessengerError::Unsupported(_) => {
                AutomationError::Failed(unsupported.to_string())
            }
            other => AutomationError::Messenger(other),
        }
    }
}

/// How one automated attempt ended, as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    /// The attempt failed; the problem says why and how badly.
    RecoverableFailure(Problem),
    Cancelled,
}

/// A service type an automation needs.
#[derive(Clone, Copy)]
pub struct InputSlot {
    type_id: TypeId,
    type_name: &'static str,
}

impl InputSlot {
    /// Slot for services registered as `Arc<T>`. `T` may be a trait object.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Slots every automation can have without registering anything.
    pub(crate) fn is_builtin(&self) -> bool {
        self.type_id == TypeId::of::<CancellationToken>()
            || self.type_id == TypeId::of::<TaskMessenger>()
    }
}

impl PartialEq for InputSlot {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for InputSlot {}

impl fmt::Debug for InputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InputSlot").field(&self.type_name).finish()
    }
}

/// A handler that completes one task automatically.
#[async_trait]
pub trait Automation: Send + Sync {
    /// Name of the task this automation completes.
    fn task_name(&self) -> &str;

    /// Services this automation needs from the pool.
    ///
    /// Default implementation needs nothing.
    fn requires(&self) -> Vec<InputSlot> {
        Vec::new()
    }

    /// Perform the task.
    ///
    /// # Returns
    /// * `Ok(())` - The task is done
    /// * `Err(AutomationError::Cancelled)` - The attempt was cancelled
    /// * `Err(_)` - The attempt failed and a human takes over
    async fn run(&self, ctx: &AutomationContext) -> Result<(), AutomationError>;
}
