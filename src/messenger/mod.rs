//! The interaction channel between the engine and a human.
//!
//! The engine never talks to a UI directly. It reports statuses and
//! problems, and asks for input or for a decision on an action item,
//! through the [`Messenger`] trait. Concrete UIs (a console, a desktop
//! window, a remote bridge) implement it outside this crate;
//! [`ChannelMessenger`] adapts the trait to a request/response channel that
//! any event loop can drive.
//!
//! Reporting methods are synchronous and must not block. Request methods
//! are async and suspend only the calling task: several tasks may have
//! requests outstanding at once.
//!
//! Questions with fixed answers and progress bars are optional. A UI
//! that does not implement them answers those requests with
//! [`MessengerError::Unsupported`] and ignores progress updates.

mod bridge;
mod task;

pub use bridge::{ChannelMessenger, MessengerEvent, Reply};
pub use task::{ListChoice, Parameter, TaskMessenger, Validator};

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::cancel::CancellationToken;
use crate::core::status::{Problem, TaskStatus, UserResponse};
use crate::core::types::{ProgressKey, RequestKey, TaskId};

/// Errors from the interaction channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessengerError {
    /// The channel is closed; no human can answer.
    #[error("the interaction channel is closed")]
    Closed,

    /// No request with this key is waiting for a reply.
    #[error("no pending request with key {0}")]
    UnknownRequest(RequestKey),

    /// The reply does not fit the request it answers.
    #[error("unexpected reply to request {key}: {reason}")]
    UnexpectedReply { key: RequestKey, reason: String },

    /// The waiting task was cancelled before a reply arrived.
    #[error("the request was cancelled")]
    Cancelled,

    /// This messenger cannot ask this kind of question.
    #[error("the messenger does not support {0}")]
    Unsupported(&'static str),
}

/// A human-supplied value was rejected by its validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvalidInput(pub String);

impl InvalidInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A request for one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    pub label: String,
    pub prompt: String,
    /// Mask the value while typing and never echo it back.
    pub is_secret: bool,
    /// Why the previous answer was rejected, if this is a re-prompt.
    pub error: Option<String>,
}

/// One field of a batched input request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRequest {
    /// Key of the value in the reply.
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub is_secret: bool,
    /// Value to pre-fill.
    pub default: Option<String>,
    /// Why the previous answer was rejected, if this is a re-prompt.
    pub error: Option<String>,
}

/// A yes/no question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub title: String,
    pub prompt: String,
}

/// A request to pick one entry of a list.
///
/// The reply is the index of the chosen entry, or `None` if the human
/// declined to choose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceRequest {
    pub title: String,
    pub prompt: String,
    pub choices: Vec<String>,
    /// Why the previous answer was rejected, if this is a re-prompt.
    pub error: Option<String>,
}

/// A progress bar for long-running work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressBar {
    pub display_name: String,
    pub max_value: f64,
    /// Unit of the progress values, such as "MB". May be empty.
    pub units: String,
}

/// The engine's view of a human interface.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Report a task's status. Fire-and-forget.
    fn report_status(&self, task: &TaskId, status: TaskStatus, message: &str);

    /// Report a problem. Fire-and-forget.
    fn report_problem(&self, problem: &Problem);

    /// Ask for one raw value.
    async fn request_input(
        &self,
        task: &TaskId,
        request: &InputRequest,
    ) -> Result<String, MessengerError>;

    /// Ask for several raw values at once, keyed by [`FieldRequest::name`].
    async fn request_inputs(
        &self,
        task: &TaskId,
        fields: &[FieldRequest],
    ) -> Result<HashMap<String, String>, MessengerError>;

    /// Show an action item and wait for the human's decision.
    ///
    /// The answer must be one of `allowed`.
    async fn request_action_item(
        &self,
        task: &TaskId,
        prompt: &str,
        allowed: &BTreeSet<UserResponse>,
    ) -> Result<UserResponse, MessengerError>;

    /// Ask a yes/no question.
    async fn request_confirmation(
        &self,
        _task: &TaskId,
        _request: &ConfirmRequest,
    ) -> Result<bool, MessengerError> {
        Err(MessengerError::Unsupported("yes/no questions"))
    }

    /// Ask the human to pick one of [`ChoiceRequest::choices`].
    async fn request_choice(
        &self,
        _task: &TaskId,
        _request: &ChoiceRequest,
    ) -> Result<Option<usize>, MessengerError> {
        Err(MessengerError::Unsupported("list choices"))
    }

    fn create_progress_bar(&self, _task: &TaskId, _key: ProgressKey, _bar: &ProgressBar) {}

    /// Move a progress bar to `progress`, out of its `max_value`.
    fn update_progress_bar(&self, _task: &TaskId, _key: ProgressKey, _progress: f64) {}

    fn delete_progress_bar(&self, _task: &TaskId, _key: ProgressKey) {}

    /// Let the human cancel the task's current attempt through `token`.
    fn offer_cancellation(&self, _task: &TaskId, _token: CancellationToken) {}

    /// The attempt offered through
    /// [`offer_cancellation`](Self::offer_cancellation) is over.
    fn withdraw_cancellation(&self, _task: &TaskId) {}
}
