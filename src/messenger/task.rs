//! Task-scoped messenger handed to automations.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::debug;

use super::{
    ChoiceRequest, ConfirmRequest, FieldRequest, InputRequest, InvalidInput, Messenger,
    MessengerError, ProgressBar,
};
use crate::core::cancel::CancellationToken;
use crate::core::status::{Problem, ProblemLevel, TaskStatus};
use crate::core::types::{ProgressKey, TaskId};

/// Turns a raw string into a typed value, or explains why it can't.
pub type Validator = Arc<dyn Fn(&str) -> Result<Value, InvalidInput> + Send + Sync>;

/// One field of a multi-value input request.
#[derive(Clone)]
pub struct Parameter {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub is_secret: bool,
    pub default: Option<String>,
    validator: Validator,
}

impl Parameter {
    /// A parameter that accepts any string.
    pub fn new(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: String::new(),
            is_secret: false,
            default: None,
            validator: Arc::new(|raw: &str| Ok(Value::String(raw.to_string()))),
        }
    }

    /// Builder: mask the value.
    pub fn secret(mut self) -> Self {
        self.is_secret = true;
        self
    }

    /// Builder: set the help text.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: set the pre-filled value.
    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Builder: set the validator.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str) -> Result<Value, InvalidInput> + Send + Sync + 'static,
    {
        self.validator = Arc::new(validator);
        self
    }

    pub fn validate(&self, raw: &str) -> Result<Value, InvalidInput> {
        (self.validator)(raw)
    }

    fn to_field(&self) -> FieldRequest {
        FieldRequest {
            name: self.name.clone(),
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            is_secret: self.is_secret,
            default: self.default.clone(),
            error: None,
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("is_secret", &self.is_secret)
            .finish_non_exhaustive()
    }
}

/// One entry of a list the human picks from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListChoice<T> {
    pub value: T,
    /// What the human sees.
    pub display: String,
}

impl<T> ListChoice<T> {
    pub fn new(value: T, display: impl Into<String>) -> Self {
        Self {
            value,
            display: display.into(),
        }
    }
}

/// A [`Messenger`] bound to one task and one attempt.
///
/// Input requests are validated here, on the engine side: a rejected value
/// is asked for again with the validation error attached, and never
/// surfaces as an error to the caller. Requests give up with
/// [`MessengerError::Cancelled`] once the attempt's token is cancelled.
#[derive(Clone)]
pub struct TaskMessenger {
    task: TaskId,
    messenger: Arc<dyn Messenger>,
    token: CancellationToken,
    cancellation_offered: Arc<AtomicBool>,
}

impl TaskMessenger {
    pub fn new(task: TaskId, messenger: Arc<dyn Messenger>, token: CancellationToken) -> Self {
        Self {
            task,
            messenger,
            token,
            cancellation_offered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn task(&self) -> &TaskId {
        &self.task
    }

    pub fn report_status(&self, status: TaskStatus, message: &str) {
        self.messenger.report_status(&self.task, status, message);
    }

    /// Report a problem for this task.
    ///
    /// A FATAL problem halts the run once the current dispatch step ends.
    pub fn report_problem(
        &self,
        level: ProblemLevel,
        message: impl Into<String>,
        cause: Option<String>,
    ) {
        let mut problem = Problem::new(level, message).for_task(self.task.clone());
        problem.cause = cause;
        self.messenger.report_problem(&problem);
    }

    /// Ask for one value and validate it, re-prompting until it is valid.
    pub async fn request_single_input<T, F>(
        &self,
        label: &str,
        is_secret: bool,
        prompt: &str,
        validate: F,
    ) -> Result<T, MessengerError>
    where
        F: Fn(&str) -> Result<T, InvalidInput>,
    {
        let mut request = InputRequest {
            label: label.to_string(),
            prompt: prompt.to_string(),
            is_secret,
            error: None,
        };
        loop {
            let raw = self
                .until_cancelled(self.messenger.request_input(&self.task, &request))
                .await?;
            match validate(&raw) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(task = %self.task, label = label, error = %e, "input rejected");
                    request.error = Some(e.to_string());
                }
            }
        }
    }

    /// Ask for several values at once, re-prompting until all are valid.
    pub async fn request_multiple_inputs(
        &self,
        parameters: &[Parameter],
    ) -> Result<HashMap<String, Value>, MessengerError> {
        let mut fields: Vec<FieldRequest> = parameters.iter().map(Parameter::to_field).collect();
        loop {
            let raw = self
                .until_cancelled(self.messenger.request_inputs(&self.task, &fields))
                .await?;

            let mut values = HashMap::with_capacity(parameters.len());
            let mut rejected = 0;
            for (param, field) in parameters.iter().zip(fields.iter_mut()) {
                let value = raw
                    .get(&param.name)
                    .map(String::as_str)
                    .or(param.default.as_deref())
                    .unwrap_or("");
                match param.validate(value) {
                    Ok(v) => {
                        field.error = None;
                        values.insert(param.name.clone(), v);
                    }
                    Err(e) => {
                        field.error = Some(e.to_string());
                        rejected += 1;
                    }
                }
                if !param.is_secret {
                    field.default = Some(value.to_string());
                }
            }

            if rejected == 0 {
                return Ok(values);
            }
            debug!(task = %self.task, rejected = rejected, "inputs rejected");
        }
    }

    /// Ask a yes/no question.
    pub async fn request_bool(&self, prompt: &str, title: &str) -> Result<bool, MessengerError> {
        let request = ConfirmRequest {
            title: title.to_string(),
            prompt: prompt.to_string(),
        };
        self.until_cancelled(self.messenger.request_confirmation(&self.task, &request))
            .await
    }

    /// Ask the human to pick one of `choices`.
    ///
    /// Returns the chosen value, or `None` if the human declined to choose.
    /// An index outside the list is asked for again.
    pub async fn request_from_list<T: Clone>(
        &self,
        choices: &[ListChoice<T>],
        prompt: &str,
        title: &str,
    ) -> Result<Option<T>, MessengerError> {
        let mut request = ChoiceRequest {
            title: title.to_string(),
            prompt: prompt.to_string(),
            choices: choices.iter().map(|c| c.display.clone()).collect(),
            error: None,
        };
        loop {
            let picked = self
                .until_cancelled(self.messenger.request_choice(&self.task, &request))
                .await?;
            let Some(index) = picked else {
                return Ok(None);
            };
            match choices.get(index) {
                Some(choice) => return Ok(Some(choice.value.clone())),
                None => {
                    debug!(task = %self.task, index = index, "choice out of range");
                    request.error = Some(format!(
                        "Choice {} is not in the list of {} options.",
                        index,
                        choices.len()
                    ));
                }
            }
        }
    }

    /// Show a progress bar and return the key to update it with.
    pub fn create_progress_bar(
        &self,
        display_name: &str,
        max_value: f64,
        units: &str,
    ) -> ProgressKey {
        let key = ProgressKey::new();
        let bar = ProgressBar {
            display_name: display_name.to_string(),
            max_value,
            units: units.to_string(),
        };
        self.messenger.create_progress_bar(&self.task, key, &bar);
        key
    }

    pub fn update_progress_bar(&self, key: ProgressKey, progress: f64) {
        self.messenger.update_progress_bar(&self.task, key, progress);
    }

    pub fn delete_progress_bar(&self, key: ProgressKey) {
        self.messenger.delete_progress_bar(&self.task, key);
    }

    /// Let the human cancel this attempt, and return the token to watch.
    pub fn allow_cancellation(&self) -> CancellationToken {
        if !self.cancellation_offered.swap(true, Ordering::SeqCst) {
            self.messenger.offer_cancellation(&self.task, self.token.clone());
        }
        self.token.clone()
    }

    /// Whether [`allow_cancellation`](Self::allow_cancellation) was called.
    pub fn cancellation_offered(&self) -> bool {
        self.cancellation_offered.load(Ordering::SeqCst)
    }

    async fn until_cancelled<T>(
        &self,
        request: impl Future<Output = Result<T, MessengerError>>,
    ) -> Result<T, MessengerError> {
        tokio::select! {
            result = request => result,
            _ = self.token.cancelled() => {
                self.token.acknowledge();
                Err(MessengerError::Cancelled)
            }
        }
    }
}

impl fmt::Debug for TaskMessenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskMessenger")
            .field("task", &self.task)
            .field("token", &self.token.state())
            .finish_non_exhaustive()
    }
}
