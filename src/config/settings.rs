//! Engine settings.
//!
//! Parsed from a YAML file; every field is optional.
//!
//! ```yaml
//! max_concurrent_automations: 4
//! retry:
//!   max_manual_retries: 3
//!   delay_secs: 2
//! poll_interval_ms: 250
//! shutdown_grace_ms: 30000
//! auto_tasks: [start_stream, upload_video]
//! placeholders:
//!   STREAM_URL: https://example.org/live
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::core::graph::Placeholders;
use crate::core::retry::RetryPolicy;

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 30_000;

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

/// Settings for one run of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Maximum automations running at once. Manual waits are never limited.
    pub max_concurrent_automations: Option<usize>,
    /// When RETRY is offered and how long to wait before re-running.
    pub retry: RetryPolicy,
    /// Polling interval for attentive sleeps.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long an aborted run waits for in-flight tasks to stop.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Tasks whose automation runs without asking. `None` automates all.
    pub auto_tasks: Option<Vec<String>>,
    /// Values for `%{KEY}%` placeholders in task descriptions.
    pub placeholders: HashMap<String, String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_automations: None,
            retry: RetryPolicy::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            auto_tasks: None,
            placeholders: HashMap::new(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a YAML string.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would make a run impossible.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_automations == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_concurrent_automations cannot be zero".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "poll_interval_ms cannot be zero".into(),
            ));
        }
        if let Some(names) = &self.auto_tasks {
            if let Some(blank) = names.iter().find(|n| n.trim().is_empty()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "auto_tasks contains a blank name: '{}'",
                    blank
                )));
            }
        }
        Ok(())
    }

    /// Builder: limit concurrent automations.
    pub fn with_max_concurrent_automations(mut self, max: usize) -> Self {
        self.max_concurrent_automations = Some(max);
        self
    }

    /// Builder: set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Builder: set the attentive-sleep polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder: set the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Builder: set the automation whitelist.
    pub fn with_auto_tasks<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auto_tasks = Some(tasks.into_iter().map(Into::into).collect());
        self
    }

    /// Builder: add a placeholder value.
    pub fn with_placeholder(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.placeholders.insert(key.into(), value.into());
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn placeholders(&self) -> Placeholders {
        Placeholders::from(self.placeholders.clone())
    }
}
