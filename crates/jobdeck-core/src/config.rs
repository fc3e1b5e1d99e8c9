use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_SHUTDOWN_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_RETRY_MARKER: &str = "TransientFailure";
pub const DEFAULT_DEDUP_CAPACITY: u64 = 10_000;
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 300;

const ENV_PREFIX: &str = "JOBDECK_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: expected an unsigned integer")]
    InvalidNumber { key: String, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("retry_marker must not be empty")]
    EmptyRetryMarker,
    #[error("failed to parse orchestrator config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for the orchestrator, its background sweep, and the
/// notification filters.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub shutdown_timeout_ms: u64,
    pub shutdown_poll_interval_ms: u64,
    pub sweep_interval_ms: u64,
    pub retry_marker: String,
    pub dedup_capacity: u64,
    pub dedup_window_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            shutdown_poll_interval_ms: DEFAULT_SHUTDOWN_POLL_INTERVAL_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            retry_marker: DEFAULT_RETRY_MARKER.to_string(),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            dedup_window_secs: DEFAULT_DEDUP_WINDOW_SECS,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Applies `JOBDECK_*` overrides on top of the defaults using `lookup`.
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let number = |name: &str, target: &mut u64| -> Result<(), ConfigError> {
            let key = format!("{ENV_PREFIX}{name}");
            if let Some(raw) = lookup(&key) {
                *target = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { key, value: raw })?;
            }
            Ok(())
        };

        number("SHUTDOWN_TIMEOUT_MS", &mut config.shutdown_timeout_ms)?;
        number(
            "SHUTDOWN_POLL_INTERVAL_MS",
            &mut config.shutdown_poll_interval_ms,
        )?;
        number("SWEEP_INTERVAL_MS", &mut config.sweep_interval_ms)?;
        number("DEDUP_CAPACITY", &mut config.dedup_capacity)?;
        number("DEDUP_WINDOW_SECS", &mut config.dedup_window_secs)?;
        if let Some(marker) = lookup(&format!("{ENV_PREFIX}RETRY_MARKER")) {
            config.retry_marker = marker;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shutdown_poll_interval_ms == 0 {
            return Err(ConfigError::Zero("shutdown_poll_interval_ms"));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Zero("sweep_interval_ms"));
        }
        if self.dedup_capacity == 0 {
            return Err(ConfigError::Zero("dedup_capacity"));
        }
        if self.dedup_window_secs == 0 {
            return Err(ConfigError::Zero("dedup_window_secs"));
        }
        if self.retry_marker.is_empty() {
            return Err(ConfigError::EmptyRetryMarker);
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    /// Number of polls the shutdown coordinator allows, counting the first.
    pub fn shutdown_poll_budget(&self) -> u64 {
        let interval = self.shutdown_poll_interval_ms.max(1);
        self.shutdown_timeout_ms.saturating_add(interval) / interval
    }
}
