//! Worker configuration.

use std::time::Duration;

use dynjob_jobs::{DEFAULT_QUEUE, is_valid_queue_name};

pub const WORKER_NAME_VAR: &str = "DYNJOB_WORKER_NAME";
pub const QUEUES_VAR: &str = "DYNJOB_QUEUES";
pub const POLL_INTERVAL_VAR: &str = "DYNJOB_POLL_INTERVAL_MS";

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} is empty")]
    Empty { var: &'static str },
    #[error("invalid queue name {queue:?} in {var}")]
    InvalidQueue { var: &'static str, queue: String },
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

/// Polling worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Thread name and log field.
    pub name: String,
    /// Queues to claim from, in priority order.
    pub queues: Vec<String>,
    /// Sleep between polls when no job is available.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "dynjob-worker".to_string(),
            queues: vec![DEFAULT_QUEUE.to_string()],
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_queues<I, Q>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Load from `DYNJOB_*` environment variables; unset ones keep defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(WORKER_NAME_VAR) {
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::Empty { var: WORKER_NAME_VAR });
            }
            config.name = name.to_string();
        }

        if let Some(queues) = lookup(QUEUES_VAR) {
            config.queues = parse_queues(&queues)?;
        }

        if let Some(value) = lookup(POLL_INTERVAL_VAR) {
            let millis = value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| ConfigError::InvalidNumber {
                    var: POLL_INTERVAL_VAR,
                    value: value.clone(),
                })?;
            config.poll_interval = Duration::from_millis(millis);
        }

        Ok(config)
    }
}

fn parse_queues(raw: &str) -> Result<Vec<String>, ConfigError> {
    let queues: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect();

    if queues.is_empty() {
        return Err(ConfigError::Empty { var: QUEUES_VAR });
    }
    if let Some(bad) = queues.iter().find(|q| !is_valid_queue_name(q)) {
        return Err(ConfigError::InvalidQueue {
            var: QUEUES_VAR,
            queue: bad.clone(),
        });
    }
    Ok(queues)
}
