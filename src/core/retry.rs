//! Retry policy for human-requested retries.
//!
//! Automation is never retried on its own: a failed attempt always falls
//! back to a human, who may choose RETRY. The policy decides whether RETRY
//! is offered and how long to wait before the next attempt.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt. `None` means
    /// RETRY stays available until the human chooses otherwise.
    pub max_manual_retries: Option<u32>,

    /// Delay before a retried attempt re-runs automation.
    #[serde(rename = "delay_secs", with = "serde_duration")]
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with no retry cap and no delay.
    pub fn unlimited() -> Self {
        Self {
            max_manual_retries: None,
            delay: Duration::ZERO,
        }
    }

    /// Create a policy that offers RETRY at most `max_retries` times.
    pub fn capped(max_retries: u32) -> Self {
        Self {
            max_manual_retries: Some(max_retries),
            delay: Duration::ZERO,
        }
    }

    /// Builder: set the delay before each retry.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Check whether RETRY may be offered after `attempts` attempts.
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts already made, including the first
    pub fn allows_retry(&self, attempts: u32) -> bool {
        match self.max_manual_retries {
            None => true,
            Some(max) => attempts.saturating_sub(1) < max,
        }
    }

    /// Get the delay before the next retry.
    pub fn get_delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    /// Default policy: unlimited retries, no delay.
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Serde helper for Duration serialization.
///
/// Serializes Duration as seconds (matching YAML config format).
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
