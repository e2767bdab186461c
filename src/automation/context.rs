//! Per-attempt context passed to automations.

use std::sync::Arc;
use std::time::Duration;

use super::{AutomationError, ServicePool};
use crate::core::cancel::{CancellationToken, sleep_attentively};
use crate::core::types::TaskId;
use crate::messenger::TaskMessenger;

/// Everything an automation may use during one attempt.
///
/// The cancellation token is fresh for every attempt, so a retried task is
/// never handed a token that was already cancelled.
#[derive(Debug, Clone)]
pub struct AutomationContext {
    task: TaskId,
    attempt: u32,
    messenger: TaskMessenger,
    token: CancellationToken,
    services: Arc<ServicePool>,
    poll_interval: Duration,
}

impl AutomationContext {
    pub fn new(
        messenger: TaskMessenger,
        token: CancellationToken,
        services: Arc<ServicePool>,
        attempt: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            task: messenger.task().clone(),
            attempt,
            messenger,
            token,
            services,
            poll_interval,
        }
    }

    pub fn task(&self) -> &TaskId {
        &self.task
    }

    /// 1 for the first attempt, incremented on every RETRY.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn messenger(&self) -> &TaskMessenger {
        &self.messenger
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Fetch a service from the pool.
    pub fn service<T>(&self) -> Result<Arc<T>, AutomationError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services
            .get::<T>()
            .ok_or(AutomationError::MissingService(std::any::type_name::<T>()))
    }

    pub fn services(&self) -> &Arc<ServicePool> {
        &self.services
    }

    /// Return `Err(Cancelled)` if this attempt was cancelled.
    pub fn check_cancelled(&self) -> Result<(), AutomationError> {
        Ok(self.token.check()?)
    }

    /// Sleep attentively: returns early with `Err(Cancelled)` within one
    /// polling interval of a cancellation request.
    pub async fn sleep(&self, duration: Duration) -> Result<(), AutomationError> {
        Ok(sleep_attentively(duration, &self.token, self.poll_interval).await?)
    }
}
