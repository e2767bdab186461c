//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a tri-state, monotonic signal:
//! `Active -> CancelRequested -> Acknowledged`. Long-running automations
//! check it at their own suspension points, or sleep through
//! [`sleep_attentively`], which bounds cancellation latency to one polling
//! interval regardless of the requested duration.
//!
//! Tokens form a tree: cancelling a token cancels every token derived from
//! it with [`CancellationToken::child_token`], but never its parent or
//! siblings. The scheduler uses this to abort a whole run at once.
//!
//! Once the operation a token guards has ended, the scheduler retires the
//! token. Retiring never cancels anything; it only stops the timers started
//! by [`CancellationToken::cancel_after`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Default polling interval for attentive sleeps.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Returned when an operation observed a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Observable state of a [`CancellationToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    /// No cancellation has been requested.
    Active,
    /// Cancellation was requested but nobody has reacted to it yet.
    CancelRequested,
    /// The operation observed the request and is unwinding.
    Acknowledged,
}

/// Cooperative abort signal for one in-flight operation.
///
/// Clones share state. A token is not reusable: once cancelled it stays
/// cancelled, so each automation attempt is handed a fresh one.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: tokio_util::sync::CancellationToken,
    acknowledged: Arc<AtomicBool>,
    retired: tokio_util::sync::CancellationToken,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: tokio_util::sync::CancellationToken::new(),
            acknowledged: Arc::new(AtomicBool::new(false)),
            retired: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Derive a token that is cancelled whenever this one is.
    pub fn child_token(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
            acknowledged: Arc::new(AtomicBool::new(false)),
            retired: self.retired.child_token(),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub fn state(&self) -> CancelState {
        if self.acknowledged.load(Ordering::SeqCst) {
            CancelState::Acknowledged
        } else if self.inner.is_cancelled() {
            CancelState::CancelRequested
        } else {
            CancelState::Active
        }
    }

    /// Mark a pending request as observed. No effect on an active token.
    pub fn acknowledge(&self) {
        if self.inner.is_cancelled() {
            self.acknowledged.store(true, Ordering::SeqCst);
        }
    }

    /// Return `Err(Cancelled)` if cancellation was requested.
    ///
    /// A failed check acknowledges the request.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.inner.is_cancelled() {
            self.acknowledge();
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// Cancel this token once `timeout` elapses, unless it is cancelled or
    /// retired first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn cancel_after(&self, timeout: Duration) -> JoinHandle<()> {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => token.cancel(),
                _ = token.cancelled() => {}
                _ = token.retired.cancelled() => {}
            }
        })
    }

    /// Stop every pending [`cancel_after`](Self::cancel_after) timer on this
    /// token and on the tokens derived from it. The cancellation state is
    /// left as it is.
    pub fn retire(&self) {
        self.retired.cancel();
    }

    pub fn is_retired(&self) -> bool {
        self.retired.is_cancelled()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleep for `duration` while watching `token`.
///
/// Returns `Err(Cancelled)` within one `poll_interval` of a cancellation
/// request. When `poll_interval >= duration` the sleep is not interrupted,
/// but a request made during it is still reported on return.
pub async fn sleep_attentively(
    duration: Duration,
    token: &CancellationToken,
    poll_interval: Duration,
) -> Result<(), Cancelled> {
    if poll_interval >= duration {
        tokio::time::sleep(duration).await;
        return token.check();
    }

    let deadline = Instant::now() + duration;
    loop {
        token.check()?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        let step = poll_interval.min(deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(step) => {}
            _ = token.cancelled() => {}
        }
    }
}
