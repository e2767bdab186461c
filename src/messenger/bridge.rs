//! Request/response bridge between the engine and a UI event loop.
//!
//! Every engine call becomes a [`MessengerEvent`] on an unbounded channel.
//! Blocking requests carry a fresh [`RequestKey`]; the UI answers with
//! [`ChannelMessenger::respond`] from its own loop, and the reply is routed
//! to the one task waiting on that key.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{
    ChoiceRequest, ConfirmRequest, FieldRequest, InputRequest, Messenger, MessengerError,
    ProgressBar,
};
use crate::core::cancel::CancellationToken;
use crate::core::status::{Problem, TaskStatus, UserResponse};
use crate::core::types::{ProgressKey, RequestKey, TaskId};

/// Something the UI should show or answer.
#[derive(Debug, Clone)]
pub enum MessengerEvent {
    Status {
        task: TaskId,
        status: TaskStatus,
        message: String,
    },
    Problem(Problem),
    /// Answer with [`Reply::Input`].
    InputRequested {
        key: RequestKey,
        task: TaskId,
        request: InputRequest,
    },
    /// Answer with [`Reply::Inputs`].
    InputsRequested {
        key: RequestKey,
        task: TaskId,
        fields: Vec<FieldRequest>,
    },
    /// Answer with [`Reply::Action`].
    ActionItem {
        key: RequestKey,
        task: TaskId,
        prompt: String,
        allowed: BTreeSet<UserResponse>,
    },
    /// Answer with [`Reply::Confirm`].
    ConfirmRequested {
        key: RequestKey,
        task: TaskId,
        request: ConfirmRequest,
    },
    /// Answer with [`Reply::Choice`].
    ChoiceRequested {
        key: RequestKey,
        task: TaskId,
        request: ChoiceRequest,
    },
    ProgressBarCreated {
        task: TaskId,
        key: ProgressKey,
        bar: ProgressBar,
    },
    ProgressBarUpdated {
        task: TaskId,
        key: ProgressKey,
        progress: f64,
    },
    ProgressBarDeleted { task: TaskId, key: ProgressKey },
    /// The waiting task gave up on this request; stop showing it.
    RequestWithdrawn { key: RequestKey },
    CancellationOffered {
        task: TaskId,
        token: CancellationToken,
    },
    CancellationWithdrawn { task: TaskId },
}

/// The UI's answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Input(String),
    Inputs(HashMap<String, String>),
    Action(UserResponse),
    Confirm(bool),
    /// Index into [`ChoiceRequest::choices`], or `None` to decline.
    Choice(Option<usize>),
}

enum Expected {
    Input,
    Inputs,
    Action(BTreeSet<UserResponse>),
    Confirm,
    /// Number of choices offered.
    Choice(usize),
}

struct Pending {
    expected: Expected,
    reply: oneshot::Sender<Reply>,
}

/// A [`Messenger`] driven by an external event loop.
pub struct ChannelMessenger {
    events: mpsc::UnboundedSender<MessengerEvent>,
    pending: Mutex<HashMap<RequestKey, Pending>>,
    closed: AtomicBool,
}

/// Removes an unanswered request when its waiter goes away.
struct PendingGuard<'a> {
    messenger: &'a ChannelMessenger,
    key: RequestKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.messenger.pending().remove(&self.key).is_some() {
            let _ = self
                .messenger
                .events
                .send(MessengerEvent::RequestWithdrawn { key: self.key });
        }
    }
}

impl ChannelMessenger {
    /// Create a messenger and the receiver its events are delivered to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MessengerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let messenger = Self {
            events,
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };
        (messenger, receiver)
    }

    /// Answer the request registered under `key`.
    ///
    /// A reply of the wrong kind, an action outside the allowed set, or a
    /// choice outside the list is rejected and the request stays pending.
    pub fn respond(&self, key: RequestKey, reply: Reply) -> Result<(), MessengerError> {
        let mut pending = self.pending();
        let Some(entry) = pending.get(&key) else {
            return Err(MessengerError::UnknownRequest(key));
        };

        let mismatch = match (&entry.expected, &reply) {
            (Expected::Input, Reply::Input(_))
            | (Expected::Inputs, Reply::Inputs(_))
            | (Expected::Confirm, Reply::Confirm(_))
            | (Expected::Choice(_), Reply::Choice(None)) => None,
            (Expected::Choice(count), Reply::Choice(Some(index))) => {
                if index < count {
                    None
                } else {
                    Some(format!("choice {} is not one of the {} offered", index, count))
                }
            }
            (Expected::Action(allowed), Reply::Action(response)) => {
                if allowed.contains(response) {
                    None
                } else {
                    Some(format!("{} is not an allowed response", response))
                }
            }
            _ => Some("reply kind does not match the request".to_string()),
        };
        if let Some(reason) = mismatch {
            return Err(MessengerError::UnexpectedReply { key, reason });
        }

        let Some(entry) = pending.remove(&key) else {
            return Err(MessengerError::UnknownRequest(key));
        };
        drop(pending);
        entry
            .reply
            .send(reply)
            .map_err(|_| MessengerError::UnknownRequest(key))
    }

    /// Close the channel. Pending and future requests fail with
    /// [`MessengerError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.pending().drain().collect();
        debug!(pending = drained.len(), "interaction channel closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.events.is_closed()
    }

    /// Number of requests waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<RequestKey, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, event: MessengerEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped; notification discarded");
        }
    }

    async fn request(
        &self,
        expected: Expected,
        event: impl FnOnce(RequestKey) -> MessengerEvent,
    ) -> Result<Reply, MessengerError> {
        if self.is_closed() {
            return Err(MessengerError::Closed);
        }

        let key = RequestKey::new();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(
            key,
            Pending {
                expected,
                reply: tx,
            },
        );
        let _guard = PendingGuard { messenger: self, key };

        if self.events.send(event(key)).is_err() {
            warn!(key = %key, "event receiver dropped; request cannot be answered");
            return Err(MessengerError::Closed);
        }
        // Closed between the check above and the insert.
        if self.closed.load(Ordering::SeqCst) {
            return Err(MessengerError::Closed);
        }

        rx.await.map_err(|_| MessengerError::Closed)
    }
}

#[async_trait]
impl Messenger for ChannelMessenger {
    fn report_status(&self, task: &TaskId, status: TaskStatus, message: &str) {
        self.notify(MessengerEvent::Status {
            task: task.clone(),
            status,
            message: message.to_string(),
        });
    }

    fn report_problem(&self, problem: &Problem) {
        self.notify(MessengerEvent::Problem(problem.clone()));
    }

    async fn request_input(
        &self,
        task: &TaskId,
        request: &InputRequest,
    ) -> Result<String, MessengerError> {
        let reply = self
            .request(Expected::Input, |key| MessengerEvent::InputRequested {
                key,
                task: task.clone(),
                request: request.clone(),
            })
            .await?;
        match reply {
            Reply::Input(value) => Ok(value),
            _ => Err(MessengerError::Closed),
        }
    }

    async fn request_inputs(
        &self,
        task: &TaskId,
        fields: &[FieldRequest],
    ) -> Result<HashMap<String, String>, MessengerError> {
        let reply = self
            .request(Expected::Inputs, |key| MessengerEvent::InputsRequested {
                key,
                task: task.clone(),
                fields: fields.to_vec(),
            })
            .await?;
        match reply {
            Reply::Inputs(values) => Ok(values),
            _ => Err(MessengerError::Closed),
        }
    }

    async fn request_action_item(
        &self,
        task: &TaskId,
        prompt: &str,
        allowed: &BTreeSet<UserResponse>,
    ) -> Result<UserResponse, MessengerError> {
        let reply = self
            .request(Expected::Action(allowed.clone()), |key| {
                MessengerEvent::ActionItem {
                    key,
                    task: task.clone(),
                    prompt: prompt.to_string(),
                    allowed: allowed.clone(),
                }
            })
            .await?;
        match reply {
            Reply::Action(response) => Ok(response),
            _ => Err(MessengerError::Closed),
        }
    }

    async fn request_confirmation(
        &self,
        task: &TaskId,
        request: &ConfirmRequest,
    ) -> Result<bool, MessengerError> {
        let reply = self
            .request(Expected::Confirm, |key| MessengerEvent::ConfirmRequested {
                key,
                task: task.clone(),
                request: request.clone(),
            })
            .await?;
        match reply {
            Reply::Confirm(answer) => Ok(answer),
            _ => Err(MessengerError::Closed),
        }
    }

    async fn request_choice(
        &self,
        task: &TaskId,
        request: &ChoiceRequest,
    ) -> Result<Option<usize>, MessengerError> {
        let expected = Expected::Choice(request.choices.len());
        let reply = self
            .request(expected, |key| MessengerEvent::ChoiceRequested {
                key,
                task: task.clone(),
                request: request.clone(),
            })
            .await?;
        match reply {
            Reply::Choice(index) => Ok(index),
            _ => Err(MessengerError::Closed),
        }
    }

    fn create_progress_bar(&self, task: &TaskId, key: ProgressKey, bar: &ProgressBar) {
        self.notify(MessengerEvent::ProgressBarCreated {
            task: task.clone(),
            key,
            bar: bar.clone(),
        });
    }

    fn update_progress_bar(&self, task: &TaskId, key: ProgressKey, progress: f64) {
        self.notify(MessengerEvent::ProgressBarUpdated {
            task: task.clone(),
            key,
            progress,
        });
    }

    fn delete_progress_bar(&self, task: &TaskId, key: ProgressKey) {
        self.notify(MessengerEvent::ProgressBarDeleted {
            task: task.clone(),
            key,
        });
    }

    fn offer_cancellation(&self, task: &TaskId, token: CancellationToken) {
        self.notify(MessengerEvent::CancellationOffered {
            task: task.clone(),
            token,
        });
    }

    fn withdraw_cancellation(&self, task: &TaskId) {
        self.notify(MessengerEvent::CancellationWithdrawn { task: task.clone() });
    }
}
