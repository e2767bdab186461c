//! Messenger wrapper that records problems into the run state.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::scheduler::MSG_SUBTASKS_DONE;
use super::state::RunState;
use crate::core::cancel::CancellationToken;
use crate::core::status::{Problem, ProblemLevel, TaskStatus, UserResponse};
use crate::core::types::{ProgressKey, TaskId};
use crate::messenger::{
    ChoiceRequest, ConfirmRequest, FieldRequest, InputRequest, Messenger, MessengerError,
    ProgressBar,
};

/// Log a problem at the matching level.
pub(crate) fn log_problem(problem: &Problem) {
    let task = problem.task.as_ref().map(TaskId::as_str).unwrap_or("-");
    match problem.level {
        ProblemLevel::Warn => {
            warn!(task = task, cause = ?problem.cause, "{}", problem.message)
        }
        ProblemLevel::Error | ProblemLevel::Fatal => {
            error!(
                task = task,
                level = %problem.level,
                cause = ?problem.cause,
                "{}",
                problem.message
            )
        }
    }
}

/// The messenger automations see.
///
/// Problems are recorded in the run report and forwarded to the host. A
/// FATAL problem also halts the run. Status reports go through the
/// status table first: a terminal one finishes the task, and one that would
/// move a finished task backwards is dropped.
pub(crate) struct RecordingMessenger {
    host: Arc<dyn Messenger>,
    state: Arc<RunState>,
}

impl RecordingMessenger {
    pub(crate) fn new(host: Arc<dyn Messenger>, state: Arc<RunState>) -> Self {
        Self { host, state }
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn report_status(&self, task: &TaskId, status: TaskStatus, message: &str) {
        let Some(completed) = self.state.apply_reported(task, status) else {
            debug!(task = %task, status = %status, "ignoring status report");
            return;
        };
        self.host.report_status(task, status, message);
        if !status.is_terminal() {
            return;
        }
        info!(task = %task, status = %status, "task finished by its automation");
        for composite in completed {
            debug!(task = %composite, "all subtasks finished");
            self.host
                .report_status(&composite, TaskStatus::Done, MSG_SUBTASKS_DONE);
        }
    }

    fn report_problem(&self, problem: &Problem) {
        log_problem(problem);
        self.host.report_problem(problem);
        if problem.is_fatal() {
            self.state.fail_run(problem.clone());
        } else {
            self.state.record_problem(problem.clone());
        }
    }

    async fn request_input(
        &self,
        task: &TaskId,
        request: &InputRequest,
    ) -> Result<String, MessengerError> {
        self.host.request_input(task, request).await
    }

    async fn request_inputs(
        &self,
        task: &TaskId,
        fields: &[FieldRequest],
    ) -> Result<HashMap<String, String>, MessengerError> {
        self.host.request_inputs(task, fields).await
    }

    async fn request_action_item(
        &self,
        task: &TaskId,
        prompt: &str,
        allowed: &BTreeSet<UserResponse>,
    ) -> Result<UserResponse, MessengerError> {
        self.host.request_action_item(task, prompt, allowed).await
    }

    async fn request_confirmation(
        &self,
        task: &TaskId,
        request: &ConfirmRequest,
    ) -> Result<bool, MessengerError> {
        self.host.request_confirmation(task, request).await
    }

    async fn request_choice(
        &self,
        task: &TaskId,
        request: &ChoiceRequest,
    ) -> Result<Option<usize>, MessengerError> {
        self.host.request_choice(task, request).await
    }

    fn create_progress_bar(&self, task: &TaskId, key: ProgressKey, bar: &ProgressBar) {
        self.host.create_progress_bar(task, key, bar);
    }

    fn update_progress_bar(&self, task: &TaskId, key: ProgressKey, progress: f64) {
        self.host.update_progress_bar(task, key, progress);
    }

    fn delete_progress_bar(&self, task: &TaskId, key: ProgressKey) {
        self.host.delete_progress_bar(task, key);
    }

    fn offer_cancellation(&self, task: &TaskId, token: CancellationToken) {
        self.host.offer_cancellation(task, token);
    }

    fn withdraw_cancellation(&self, task: &TaskId) {
        self.host.withdraw_cancellation(task);
    }
}
