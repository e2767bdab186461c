//! Testing utilities for users of the handoff library.
//!
//! This module provides doubles for exercising checklists without a UI:
//!
//! - [`ScriptedMessenger`]: A messenger that answers from a script and
//!   records everything
//! - [`FnAutomation`]: An automation built from a closure
//! - [`FlakyAutomation`]: An automation that fails N times then succeeds
//! - [`SleepingAutomation`]: An automation that waits, attentively or not

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::automation::{Automation, AutomationContext, AutomationError, InputSlot};
use crate::core::cancel::CancellationToken;
use crate::core::status::{Problem, TaskStatus, UserResponse};
use crate::core::types::{ProgressKey, TaskId};
use crate::messenger::{
    ChoiceRequest, ConfirmRequest, FieldRequest, InputRequest, Messenger, MessengerError,
    ProgressBar,
};

/// A status report captured by [`ScriptedMessenger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub task: TaskId,
    pub status: TaskStatus,
    pub message: String,
}

/// An action item captured by [`ScriptedMessenger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionItemRecord {
    pub task: TaskId,
    pub prompt: String,
    pub allowed: BTreeSet<UserResponse>,
}

/// A progress bar change captured by [`ScriptedMessenger`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressRecord {
    Created { key: ProgressKey, bar: ProgressBar },
    Updated { key: ProgressKey, progress: f64 },
    Deleted { key: ProgressKey },
}

#[derive(Default)]
struct Script {
    inputs: HashMap<String, VecDeque<String>>,
    batches: VecDeque<HashMap<String, String>>,
    confirmations: VecDeque<bool>,
    choices: VecDeque<Option<usize>>,
    actions: HashMap<TaskId, VecDeque<UserResponse>>,
    default_action: Option<UserResponse>,
}

#[derive(Default)]
struct Log {
    statuses: Vec<StatusRecord>,
    problems: Vec<Problem>,
    input_requests: Vec<InputRequest>,
    field_requests: Vec<Vec<FieldRequest>>,
    confirm_requests: Vec<ConfirmRequest>,
    choice_requests: Vec<ChoiceRequest>,
    progress: Vec<(TaskId, ProgressRecord)>,
    action_items: Vec<ActionItemRecord>,
    offers: Vec<(TaskId, CancellationToken)>,
    withdrawals: Vec<TaskId>,
}

/// A messenger that answers requests from a script.
///
/// When the script has no answer, a request fails with
/// [`MessengerError::Closed`], unless the messenger was told to leave such
/// requests pending.
///
/// # Example
///
/// ```
/// use handoff::testing::ScriptedMessenger;
/// use handoff::UserResponse;
///
/// let messenger = ScriptedMessenger::new()
///     .with_action("check_audio", UserResponse::Retry)
///     .with_action("check_audio", UserResponse::Done)
///     .with_default_action(UserResponse::Skip);
/// assert!(messenger.action_items().is_empty());
/// ```
#[derive(Default)]
pub struct ScriptedMessenger {
    script: Mutex<Script>,
    log: Mutex<Log>,
    pending_inputs: bool,
    pending_actions: bool,
    closed: bool,
    cancel_on_offer: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answers to `request_input` calls with this label.
    pub fn with_inputs<I, S>(self, label: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.script)
            .inputs
            .entry(label.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Queue one answer to a `request_inputs` call.
    pub fn with_input_batch<I, K, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let batch = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        lock(&self.script).batches.push_back(batch);
        self
    }

    /// Queue answers to yes/no questions, in order.
    pub fn with_confirmations<I>(self, answers: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        lock(&self.script).confirmations.extend(answers);
        self
    }

    /// Queue answers to list choices, in order. `None` declines.
    pub fn with_choices<I>(self, answers: I) -> Self
    where
        I: IntoIterator<Item = Option<usize>>,
    {
        lock(&self.script).choices.extend(answers);
        self
    }

    /// Queue a response to the next action item for `task`.
    pub fn with_action(self, task: impl Into<TaskId>, response: UserResponse) -> Self {
        lock(&self.script)
            .actions
            .entry(task.into())
            .or_default()
            .push_back(response);
        self
    }

    /// Response for action items with nothing queued.
    pub fn with_default_action(self, response: UserResponse) -> Self {
        lock(&self.script).default_action = Some(response);
        self
    }

    /// Leave unscripted input requests and questions pending forever.
    pub fn with_pending_inputs(mut self) -> Self {
        self.pending_inputs = true;
        self
    }

    /// Leave unscripted action items pending forever.
    pub fn with_pending_actions(mut self) -> Self {
        self.pending_actions = true;
        self
    }

    /// Cancel every token as soon as it is offered, like a human pressing
    /// Cancel straight away.
    pub fn with_cancel_on_offer(mut self) -> Self {
        self.cancel_on_offer = true;
        self
    }

    /// Fail every request with [`MessengerError::Closed`].
    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }

    /// Every status report, in order.
    pub fn status_log(&self) -> Vec<StatusRecord> {
        lock(&self.log).statuses.clone()
    }

    /// Status reports for one task, in order.
    pub fn statuses(&self, task: &TaskId) -> Vec<(TaskStatus, String)> {
        lock(&self.log)
            .statuses
            .iter()
            .filter(|r| &r.task == task)
            .map(|r| (r.status, r.message.clone()))
            .collect()
    }

    /// Position of the first report of `status` for `task` in the status log.
    pub fn first_report(&self, task: &TaskId, status: TaskStatus) -> Option<usize> {
        lock(&self.log)
            .statuses
            .iter()
            .position(|r| &r.task == task && r.status == status)
    }

    pub fn problems(&self) -> Vec<Problem> {
        lock(&self.log).problems.clone()
    }

    pub fn input_requests(&self) -> Vec<InputRequest> {
        lock(&self.log).input_requests.clone()
    }

    pub fn field_requests(&self) -> Vec<Vec<FieldRequest>> {
        lock(&self.log).field_requests.clone()
    }

    pub fn confirm_requests(&self) -> Vec<ConfirmRequest> {
        lock(&self.log).confirm_requests.clone()
    }

    pub fn choice_requests(&self) -> Vec<ChoiceRequest> {
        lock(&self.log).choice_requests.clone()
    }

    /// Progress bar changes for one task, in order.
    pub fn progress(&self, task: &TaskId) -> Vec<ProgressRecord> {
        lock(&self.log)
            .progress
            .iter()
            .filter(|(t, _)| t == task)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn action_items(&self) -> Vec<ActionItemRecord> {
        lock(&self.log).action_items.clone()
    }

    /// Number of times cancellation was offered for `task`.
    pub fn cancellation_offers(&self, task: &TaskId) -> usize {
        lock(&self.log)
            .offers
            .iter()
            .filter(|(t, _)| t == task)
            .count()
    }

    /// The most recent token offered for `task`.
    pub fn offered_token(&self, task: &TaskId) -> Option<CancellationToken> {
        lock(&self.log)
            .offers
            .iter()
            .rev()
            .find(|(t, _)| t == task)
            .map(|(_, token)| token.clone())
    }

    /// Number of times an offer for `task` was withdrawn.
    pub fn cancellation_withdrawals(&self, task: &TaskId) -> usize {
        lock(&self.log)
            .withdrawals
            .iter()
            .filter(|t| *t == task)
            .count()
    }
}

#[async_trait]
impl Messenger for ScriptedMessenger {
    fn report_status(&self, task: &TaskId, status: TaskStatus, message: &str) {
        lock(&self.log).statuses.push(StatusRecord {
            task: task.clone(),
            status,
            message: message.to_string(),
        });
    }

    fn report_problem(&self, problem: &Problem) {
        lock(&self.log).problems.push(problem.clone());
    }

    async fn request_input(
        &self,
        _task: &TaskId,
        request: &InputRequest,
    ) -> Result<String, MessengerError> {
        lock(&self.log).input_requests.push(request.clone());
        if self.closed {
            return Err(MessengerError::Closed);
        }
        let answer = lock(&self.script)
            .inputs
            .get_mut(&request.label)
            .and_then(VecDeque::pop_front);
        match answer {
            Some(value) => Ok(value),
            None if self.pending_inputs => std::future::pending().await,
            None => Err(MessengerError::Closed),
        }
    }

    async fn request_inputs(
        &self,
        _task: &TaskId,
        fields: &[FieldRequest],
    ) -> Result<HashMap<String, String>, MessengerError> {
        lock(&self.log).field_requests.push(fields.to_vec());
        if self.closed {
            return Err(MessengerError::Closed);
        }
        let answer = lock(&self.script).batches.pop_front();
        match answer {
            Some(values) => Ok(values),
            None if self.pending_inputs => std::future::pending().await,
            None => Err(MessengerError::Closed),
        }
    }

    async fn request_action_item(
        &self,
        task: &TaskId,
        prompt: &str,
        allowed: &BTreeSet<UserResponse>,
    ) -> Result<UserResponse, MessengerError> {
        lock(&self.log).action_items.push(ActionItemRecord {
            task: task.clone(),
            prompt: prompt.to_string(),
            allowed: allowed.clone(),
        });
        if self.closed {
            return Err(MessengerError::Closed);
        }
        let answer = {
            let mut script = lock(&self.script);
            let queued = script.actions.get_mut(task).and_then(VecDeque::pop_front);
            queued.or(script.default_action)
        };
        match answer {
            Some(response) => Ok(response),
            None if self.pending_actions => std::future::pending().await,
            None => Err(MessengerError::Closed),
        }
    }

    async fn request_confirmation(
        &self,
        _task: &TaskId,
        request: &ConfirmRequest,
    ) -> Result<bool, MessengerError> {
        lock(&self.log).confirm_requests.push(request.clone());
        if self.closed {
            return Err(MessengerError::Closed);
        }
        let answer = lock(&self.script).confirmations.pop_front();
        match answer {
            Some(value) => Ok(value),
            None if self.pending_inputs => std::future::pending().await,
            None => Err(MessengerError::Closed),
        }
    }

    async fn request_choice(
        &self,
        _task: &TaskId,
        request: &ChoiceRequest,
    ) -> Result<Option<usize>, MessengerError> {
        lock(&self.log).choice_requests.push(request.clone());
        if self.closed {
            return Err(MessengerError::Closed);
        }
        let answer = lock(&self.script).choices.pop_front();
        match answer {
            Some(index) => Ok(index),
            None if self.pending_inputs => std::future::pending().await,
            None => Err(MessengerError::Closed),
        }
    }

    fn create_progress_bar(&self, task: &TaskId, key: ProgressKey, bar: &ProgressBar) {
        let record = ProgressRecord::Created {
            key,
            bar: bar.clone(),
        };
        lock(&self.log).progress.push((task.clone(), record));
    }

    fn update_progress_bar(&self, task: &TaskId, key: ProgressKey, progress: f64) {
        let record = ProgressRecord::Updated { key, progress };
        lock(&self.log).progress.push((task.clone(), record));
    }

    fn delete_progress_bar(&self, task: &TaskId, key: ProgressKey) {
        let record = ProgressRecord::Deleted { key };
        lock(&self.log).progress.push((task.clone(), record));
    }

    fn offer_cancellation(&self, task: &TaskId, token: CancellationToken) {
        if self.cancel_on_offer {
            token.cancel();
        }
        lock(&self.log).offers.push((task.clone(), token));
    }

    fn withdraw_cancellation(&self, task: &TaskId) {
        lock(&self.log).withdrawals.push(task.clone());
    }
}

type RunFuture = Pin<Box<dyn Future<Output = Result<(), AutomationError>> + Send>>;
type RunFn = dyn Fn(AutomationContext) -> RunFuture + Send + Sync;

/// An automation built from a closure.
///
/// # Example
///
/// ```
/// use handoff::testing::FnAutomation;
/// use handoff::automation::AutomationError;
///
/// let upload = FnAutomation::new("upload_video", |ctx| async move {
///     ctx.check_cancelled()?;
///     Err(AutomationError::failed("upload rejected"))
/// });
/// ```
pub struct FnAutomation {
    name: String,
    requires: Vec<InputSlot>,
    run: Arc<RunFn>,
}

impl FnAutomation {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(AutomationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AutomationError>> + Send + 'static,
    {
        let run: Arc<RunFn> = Arc::new(move |ctx| -> RunFuture { Box::pin(run(ctx)) });
        Self {
            name: name.into(),
            requires: Vec::new(),
            run,
        }
    }

    /// An automation that always succeeds.
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::new(name, |_ctx| async { Ok(()) })
    }

    /// An automation that always fails with `message`.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(name, move |_ctx| {
            let message = message.clone();
            async move { Err(AutomationError::Failed(message)) }
        })
    }

    /// Builder: declare required services.
    pub fn with_requirements(mut self, requires: Vec<InputSlot>) -> Self {
        self.requires = requires;
        self
    }
}

#[async_trait]
impl Automation for FnAutomation {
    fn task_name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<InputSlot> {
        self.requires.clone()
    }

    async fn run(&self, ctx: &AutomationContext) -> Result<(), AutomationError> {
        (self.run)(ctx.clone()).await
    }
}

/// An automation that fails a set number of times, then succeeds.
///
/// # Example
///
/// ```
/// use handoff::testing::FlakyAutomation;
///
/// // Fails twice, then succeeds
/// let automation = FlakyAutomation::new("start_stream", 2);
/// assert_eq!(automation.calls(), 0);
/// ```
pub struct FlakyAutomation {
    name: String,
    failures_remaining: AtomicU32,
    calls: AtomicU32,
    error_message: String,
}

impl FlakyAutomation {
    /// Create an automation that fails `fail_count` times then succeeds.
    pub fn new(name: impl Into<String>, fail_count: u32) -> Self {
        Self::with_error(name, fail_count, "intentional test failure")
    }

    /// Create an automation that fails with a custom error message.
    pub fn with_error(
        name: impl Into<String>,
        fail_count: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            failures_remaining: AtomicU32::new(fail_count),
            calls: AtomicU32::new(0),
            error_message: message.into(),
        }
    }

    /// Number of times the automation has run.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn failures_remaining(&self) -> u32 {
        self.failures_remaining.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Automation for FlakyAutomation {
    fn task_name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &AutomationContext) -> Result<(), AutomationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(AutomationError::Failed(self.error_message.clone()))
        } else {
            Ok(())
        }
    }
}

/// An automation that waits, then succeeds.
///
/// By default the wait is attentive and ends early with
/// [`AutomationError::Cancelled`] when the attempt is cancelled.
pub struct SleepingAutomation {
    name: String,
    duration: Duration,
    attentive: bool,
    offer_cancellation: bool,
    started: AtomicBool,
    cancelled: AtomicBool,
}

impl SleepingAutomation {
    pub fn new(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            duration,
            attentive: true,
            offer_cancellation: false,
            started: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Builder: ignore cancellation and sleep the full duration.
    pub fn uninterruptible(mut self) -> Self {
        self.attentive = false;
        self
    }

    /// Builder: offer cancellation to the human before sleeping.
    pub fn offering_cancellation(mut self) -> Self {
        self.offer_cancellation = true;
        self
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether a run ended early because of a cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Automation for SleepingAutomation {
    fn task_name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> Vec<InputSlot> {
        vec![InputSlot::of::<CancellationToken>()]
    }

    async fn run(&self, ctx: &AutomationContext) -> Result<(), AutomationError> {
        self.started.store(true, Ordering::SeqCst);
        if self.offer_cancellation {
            ctx.messenger().allow_cancellation();
        }
        if !self.attentive {
            tokio::time::sleep(self.duration).await;
            return Ok(());
        }
        let result = ctx.sleep(self.duration).await;
        if matches!(result, Err(AutomationError::Cancelled)) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        result
    }
}
