//! Checklist scheduler.
//!
//! The `Scheduler` drives every leaf task from NOT_STARTED to DONE or
//! SKIPPED. Ready tasks run concurrently, each on its own tokio task. A
//! task is tried with automation first and handed to a human through an
//! action item whenever automation is missing, fails, or is cancelled.

use std::any::Any;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::handle::RunHandle;
use super::recorder::{RecordingMessenger, log_problem};
use super::report::RunReport;
use super::state::RunState;
use crate::automation::{
    AutomationContext, AutomationError, AutomationResolver, Outcome, Resolution,
    ResolvedAutomation,
};
use crate::config::{ConfigError, EngineSettings};
use crate::core::cancel::{CancellationToken, sleep_attentively};
use crate::core::graph::TaskGraph;
use crate::core::status::{Problem, TaskStatus, UserResponse};
use crate::core::types::{RunId, TaskId};
use crate::messenger::{Messenger, TaskMessenger};

const MSG_NOT_STARTED: &str = "-";
const MSG_STARTED: &str = "Task started.";
const MSG_DONE_AUTOMATICALLY: &str = "Task completed automatically.";
const MSG_DONE_MANUALLY: &str = "Task completed manually.";
const MSG_SKIPPED: &str = "Task skipped.";
pub(super) const MSG_SUBTASKS_DONE: &str = "All subtasks are finished.";
const MSG_NOT_AUTOMATED: &str = "This task is not automated.";
const MSG_AUTOMATION_FAILED: &str = "The task automation failed. Requesting user input.";
const MSG_AUTOMATION_CANCELLED: &str =
    "The task was cancelled by the user. Requesting user input.";
const MSG_NOT_WHITELISTED: &str =
    "Task automation skipped because this task is not in the list of tasks to automate. You can retry if you want the task to be automated after all.";

/// Errors detected before a run starts.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Settings failed validation.
    #[error(transparent)]
    InvalidSettings(#[from] ConfigError),

    /// An `auto_tasks` entry does not name a leaf task.
    #[error("'{0}' is in the list of tasks to automate but is not a leaf task")]
    UnknownAutoTask(String),

    /// An `auto_tasks` entry has no registered automation.
    #[error("task '{0}' is in the list of tasks to automate but has no automation")]
    AutoTaskNotAutomated(TaskId),

    /// The run's driver task failed.
    #[error("the run driver stopped unexpectedly: {0}")]
    Driver(String),
}

/// Runs a checklist against a messenger.
pub struct Scheduler {
    graph: Arc<TaskGraph>,
    resolver: AutomationResolver,
    messenger: Arc<dyn Messenger>,
    settings: EngineSettings,
}

impl Scheduler {
    pub fn new(
        graph: impl Into<Arc<TaskGraph>>,
        resolver: AutomationResolver,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            graph: graph.into(),
            resolver,
            messenger,
            settings: EngineSettings::default(),
        }
    }

    /// Builder: set the engine settings.
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run the checklist to completion.
    ///
    /// Returns `Err` only if a start-up check fails; everything that goes
    /// wrong once tasks are running ends up in the report.
    pub async fn run(self) -> Result<RunReport, ExecutionError> {
        let (_handle, driver) = self.start()?;
        driver
            .await
            .map_err(|e| ExecutionError::Driver(e.to_string()))
    }

    /// Start the checklist in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<(RunHandle, JoinHandle<RunReport>), ExecutionError> {
        let whitelist = self.check()?;

        let run_id = RunId::new();
        let state = Arc::new(RunState::new(
            run_id,
            Arc::clone(&self.graph),
            CancellationToken::new(),
        ));
        let handle = RunHandle::new(run_id, Arc::clone(&state));

        let recorder: Arc<dyn Messenger> = Arc::new(RecordingMessenger::new(
            Arc::clone(&self.messenger),
            Arc::clone(&state),
        ));
        let permits = self
            .settings
            .max_concurrent_automations
            .map(|max| Arc::new(Semaphore::new(max)));

        let run = Arc::new(Run {
            graph: self.graph,
            resolver: self.resolver,
            host: self.messenger,
            recorder,
            state,
            settings: self.settings,
            whitelist,
            permits,
        });

        let span = info_span!("checklist_run", run = %run_id);
        let driver = tokio::spawn(run.drive().instrument(span));
        Ok((handle, driver))
    }

    /// Start-up checks. Returns the automation whitelist, if any.
    fn check(&self) -> Result<Option<HashSet<TaskId>>, ExecutionError> {
        self.settings.validate()?;

        let Some(names) = &self.settings.auto_tasks else {
            return Ok(None);
        };
        let mut whitelist = HashSet::with_capacity(names.len());
        for name in names {
            let id = TaskId::new(name.trim());
            if !self.graph.get(&id).is_some_and(|node| node.is_leaf()) {
                return Err(ExecutionError::UnknownAutoTask(name.clone()));
            }
            if !self.resolver.has_automation(&id) {
                return Err(ExecutionError::AutoTaskNotAutomated(id));
            }
            whitelist.insert(id);
        }
        Ok(Some(whitelist))
    }
}

/// Shared state of one run.
struct Run {
    graph: Arc<TaskGraph>,
    resolver: AutomationResolver,
    /// The host's messenger, for engine-issued reports and requests.
    host: Arc<dyn Messenger>,
    /// The messenger automations see.
    recorder: Arc<dyn Messenger>,
    state: Arc<RunState>,
    settings: EngineSettings,
    whitelist: Option<HashSet<TaskId>>,
    permits: Option<Arc<Semaphore>>,
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Run {
    fn run_token(&self) -> &CancellationToken {
        self.state.run_token()
    }

    async fn drive(self: Arc<Self>) -> RunReport {
        info!(
            tasks = self.graph.len(),
            leaves = self.graph.leaf_count(),
            "starting checklist run"
        );

        for leaf in self.graph.leaves() {
            self.host
                .report_status(leaf.id(), TaskStatus::NotStarted, MSG_NOT_STARTED);
        }
        self.report_resolution_gaps();

        let mut changes = self.state.subscribe();
        let mut dispatched = HashSet::new();
        let mut workers = JoinSet::new();

        loop {
            if !self.state.is_halted() {
                let ready = self.state.ready_leaves(&dispatched);
                if !ready.is_empty() {
                    debug!(ready_count = ready.len(), "dispatching ready tasks");
                }
                for id in ready {
                    dispatched.insert(id.clone());
                    let span = info_span!("task", task = %id);
                    workers.spawn(Arc::clone(&self).run_task(id).instrument(span));
                }
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = self.run_token().cancelled() => break,
                joined = workers.join_next() => {
                    if let Some(Err(e)) = joined {
                        error!(error = %e, "task worker terminated unexpectedly");
                        self.halt(
                            Problem::fatal("A task worker terminated unexpectedly.")
                                .with_cause(e.to_string()),
                        );
                    }
                }
                _ = changes.changed() => {}
            }
        }

        if !workers.is_empty() {
            self.shutdown(workers).await;
        }

        let report = self.state.snapshot();
        info!(
            done = report.done_count(),
            skipped = report.skipped_count(),
            unfinished = report.unfinished().len(),
            aborted = report.aborted,
            fatal = report.fatal.is_some(),
            duration_ms = report.duration.as_millis() as u64,
            "checklist run finished"
        );
        report
    }

    /// Warn about automations that can never run, before any task starts.
    fn report_resolution_gaps(&self) {
        let unused = self.resolver.unused_automations(&self.graph);
        if !unused.is_empty() {
            self.raise(Problem::warn(format!(
                "The following automations are not used by any task: {}",
                unused.join(", ")
            )));
        }

        for leaf in self.graph.leaves() {
            if let Resolution::Unresolvable(problem) = self.resolver.resolve(leaf.id()) {
                self.raise(problem);
            }
        }
    }

    /// Give in-flight tasks the grace period to observe cancellation.
    async fn shutdown(&self, mut workers: JoinSet<()>) {
        let grace = self.settings.shutdown_grace();
        info!(
            in_flight = workers.len(),
            grace_ms = grace.as_millis() as u64,
            "run halted, waiting for in-flight tasks"
        );

        let drained = tokio::time::timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = workers.len(),
                "shutdown grace period elapsed, aborting in-flight tasks"
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }
    }

    /// Record, log, and forward a problem raised by the engine.
    fn raise(&self, problem: Problem) {
        log_problem(&problem);
        self.host.report_problem(&problem);
        self.state.record_problem(problem);
    }

    /// Raise a run-level FATAL and stop dispatching.
    fn halt(&self, problem: Problem) {
        log_problem(&problem);
        self.host.report_problem(&problem);
        self.state.fail_run(problem);
    }

    fn report(&self, id: &TaskId, status: TaskStatus, message: &str) {
        self.state.set_status(id, status);
        self.host.report_status(id, status, message);
    }

    fn finish(&self, id: &TaskId, status: TaskStatus, message: &str) {
        let completed = self.state.commit_terminal(id, status);
        self.host.report_status(id, status, message);
        info!(task = %id, status = %status, "task finished");

        for composite in completed {
            debug!(task = %composite, "all subtasks finished");
            self.host
                .report_status(&composite, TaskStatus::Done, MSG_SUBTASKS_DONE);
        }
    }

    /// Drive one leaf task to a terminal status, or until the run halts.
    async fn run_task(self: Arc<Self>, id: TaskId) {
        let Some(node) = self.graph.get(&id) else {
            return;
        };
        let automation_only = node.automation_only();
        let prompt = node.description().unwrap_or_default().to_string();

        self.state.begin(&id);
        let mut skip_automation = self
            .whitelist
            .as_ref()
            .is_some_and(|whitelist| !whitelist.contains(&id))
            && self.resolver.has_automation(&id);

        loop {
            if self.state.is_halted() {
                return;
            }
            let attempts = self.state.attempts(&id);

            let (message, allow_retry) = if skip_automation {
                skip_automation = false;
                debug!(task = %id, "automation not whitelisted");
                (MSG_NOT_WHITELISTED, true)
            } else {
                match self.resolver.resolve(&id) {
                    Resolution::NotAutomated => (MSG_NOT_AUTOMATED, false),
                    Resolution::Unresolvable(problem) => {
                        // The first attempt's gap was reported before the run started.
                        if attempts > 1 {
                            self.raise(problem);
                        }
                        (MSG_NOT_AUTOMATED, false)
                    }
                    Resolution::Found(found) => {
                        self.report(&id, TaskStatus::Running, MSG_STARTED);
                        let outcome = self.attempt(&id, attempts, found).await;
                        if self.state.status(&id).is_some_and(TaskStatus::is_terminal) {
                            // The automation reported its own terminal status.
                            if let Outcome::RecoverableFailure(problem) = outcome {
                                self.raise(problem);
                            }
                            debug!(task = %id, "task finished by its automation");
                            return;
                        }
                        match outcome {
                            Outcome::Success => {
                                self.finish(&id, TaskStatus::Done, MSG_DONE_AUTOMATICALLY);
                                return;
                            }
                            Outcome::Cancelled => {
                                if self.state.is_halted() {
                                    return;
                                }
                                (MSG_AUTOMATION_CANCELLED, true)
                            }
                            Outcome::RecoverableFailure(problem) => {
                                if problem.is_fatal()
                                    && automation_only
                                    && !self.settings.retry.allows_retry(attempts)
                                {
                                    self.halt(problem);
                                    return;
                                }
                                self.raise(problem);
                                (MSG_AUTOMATION_FAILED, true)
                            }
                        }
                    }
                }
            };

            let allowed = self.allowed_responses(allow_retry, attempts, automation_only);
            let Some(response) = self.manual(&id, &prompt, message, &allowed).await else {
                return;
            };

            match response {
                UserResponse::Done => {
                    self.finish(&id, TaskStatus::Done, MSG_DONE_MANUALLY);
                    return;
                }
                UserResponse::Skip => {
                    self.finish(&id, TaskStatus::Skipped, MSG_SKIPPED);
                    return;
                }
                UserResponse::Retry => {
                    let attempt = self.state.retry(&id);
                    debug!(task = %id, attempt = attempt, "retrying task");
                    let delay = self.settings.retry.get_delay();
                    if !delay.is_zero()
                        && sleep_attentively(delay, self.run_token(), self.settings.poll_interval())
                            .await
                            .is_err()
                    {
                        return;
                    }
                }
            }
        }
    }

    fn allowed_responses(
        &self,
        allow_retry: bool,
        attempts: u32,
        automation_only: bool,
    ) -> BTreeSet<UserResponse> {
        let mut allowed =
            BTreeSet::from([UserResponse::Done, UserResponse::Retry, UserResponse::Skip]);
        if !allow_retry || !self.settings.retry.allows_retry(attempts) {
            allowed.remove(&UserResponse::Retry);
        }
        if automation_only {
            allowed.remove(&UserResponse::Done);
        }
        allowed
    }

    /// Open an action item and wait for the human.
    ///
    /// Returns `None` if the run halted while waiting.
    async fn manual(
        &self,
        id: &TaskId,
        prompt: &str,
        message: &str,
        allowed: &BTreeSet<UserResponse>,
    ) -> Option<UserResponse> {
        if self.state.is_halted() {
            return None;
        }
        self.report(id, TaskStatus::WaitingForUser, message);

        let response = tokio::select! {
            biased;
            _ = self.run_token().cancelled() => return None,
            response = self.host.request_action_item(id, prompt, allowed) => response,
        };

        match response {
            Ok(response) if allowed.contains(&response) => {
                debug!(task = %id, response = %response, "action item answered");
                Some(response)
            }
            Ok(response) => {
                self.halt(
                    Problem::fatal(format!(
                        "The messenger answered {} for task '{}', which was not one of the allowed responses.",
                        response, id
                    ))
                    .for_task(id.clone()),
                );
                None
            }
            Err(e) => {
                self.halt(
                    Problem::fatal(format!(
                        "The messenger failed while waiting for a response to task '{}'.",
                        id
                    ))
                    .with_cause(e.to_string())
                    .for_task(id.clone()),
                );
                None
            }
        }
    }

    /// Run one automated attempt on its own tokio task.
    ///
    /// Errors and panics are turned into an [`Outcome`] here and never reach
    /// the scheduler.
    async fn attempt(&self, id: &TaskId, attempt: u32, found: ResolvedAutomation) -> Outcome {
        let token = self.run_token().child_token();
        let messenger = TaskMessenger::new(id.clone(), Arc::clone(&self.recorder), token.clone());
        let context = AutomationContext::new(
            messenger.clone(),
            token.clone(),
            Arc::clone(found.services()),
            attempt,
            self.settings.poll_interval(),
        );

        let permit = match &self.permits {
            Some(permits) => {
                let acquired = tokio::select! {
                    biased;
                    _ = self.run_token().cancelled() => return Outcome::Cancelled,
                    permit = Arc::clone(permits).acquire_owned() => permit,
                };
                match acquired {
                    Ok(permit) => Some(permit),
                    Err(_) => return Outcome::Cancelled,
                }
            }
            None => None,
        };

        debug!(task = %id, attempt = attempt, "running automation");
        let automation = Arc::clone(found.automation());
        let join = tokio::spawn(
            async move {
                let _permit = permit;
                automation.run(&context).await
            }
            .in_current_span(),
        );
        let guard = AbortOnDrop(join.abort_handle());
        let result = join.await;
        drop(guard);
        // Timers the automation armed on its token end with the attempt.
        token.retire();

        if messenger.cancellation_offered() {
            self.host.withdraw_cancellation(id);
        }

        match result {
            Ok(Ok(())) => Outcome::Success,
            Ok(Err(AutomationError::Cancelled)) => {
                token.acknowledge();
                debug!(task = %id, "automation cancelled");
                Outcome::Cancelled
            }
            Ok(Err(AutomationError::Messenger(e))) => {
                self.halt(
                    Problem::fatal("The messenger failed while the task automation was running.")
                        .with_cause(e.to_string())
                        .for_task(id.clone()),
                );
                Outcome::Cancelled
            }
            Ok(Err(AutomationError::Fatal(message))) => {
                Outcome::RecoverableFailure(Problem::fatal(message).for_task(id.clone()))
            }
            Ok(Err(e)) => {
                let mut problem = Problem::error(format!(
                    "An error occurred while trying to complete the task automatically: {}",
                    e
                ))
                .for_task(id.clone());
                problem.cause = cause_chain(&e);
                Outcome::RecoverableFailure(problem)
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                Outcome::RecoverableFailure(
                    Problem::error(format!(
                        "An error occurred while trying to complete the task automatically: the automation panicked: {}",
                        message
                    ))
                    .for_task(id.clone()),
                )
            }
            Err(_) => Outcome::Cancelled,
        }
    }
}

/// Sources of an error, outermost first.
fn cause_chain(error: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut causes = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    if causes.is_empty() {
        None
    } else {
        Some(causes.join(": "))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
