//! Bridge configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Per-call deadline settings (seconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Deadline applied to tools without a tool-specific default.
    #[serde(default = "default_call_seconds")]
    pub default_seconds: u64,
    /// Default deadline for `bash`, which may run long shell commands.
    #[serde(default = "default_bash_seconds")]
    pub bash_seconds: u64,
    /// Overall budget for one `explore` stream.
    #[serde(default = "default_explore_seconds")]
    pub explore_seconds: u64,
    /// Upper bound for any effective deadline, including caller overrides.
    #[serde(default = "default_max_seconds")]
    pub max_seconds: u64,
    /// Grace period added on top of an explicit tool `timeout` argument so the
    /// daemon's own timeout report can arrive before ours fires.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_seconds: default_call_seconds(),
            bash_seconds: default_bash_seconds(),
            explore_seconds: default_explore_seconds(),
            max_seconds: default_max_seconds(),
            grace_seconds: default_grace_seconds(),
        }
    }
}

fn default_call_seconds() -> u64 {
    60
}

fn default_bash_seconds() -> u64 {
    300
}

fn default_explore_seconds() -> u64 {
    600
}

fn default_max_seconds() -> u64 {
    1800
}

fn default_grace_seconds() -> u64 {
    5
}

/// Fan-out and queueing limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LimitConfig {
    /// Maximum entries accepted in one `batch` call.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Maximum outstanding calls per channel before new calls fail fast.
    #[serde(default = "default_max_pending_calls")]
    pub max_pending_calls: usize,
    /// Capacity of the outbound frame queue feeding the writer task.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_pending_calls: default_max_pending_calls(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

fn default_max_batch_size() -> usize {
    25
}

fn default_max_pending_calls() -> usize {
    256
}

fn default_outbound_queue() -> usize {
    64
}

/// Explore sub-agent settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExploreConfig {
    /// Maximum reasoning steps before the nested agent is stopped.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Capacity of the event channel between producer and consumer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_max_steps() -> u32 {
    16
}

fn default_event_buffer() -> usize {
    32
}

/// Fixed-window rate limit applied per user before dispatch.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Calls admitted per key per window.
    #[serde(default = "default_calls_per_window")]
    pub calls_per_window: u32,
    /// Window length.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls_per_window: default_calls_per_window(),
            window_seconds: default_window_seconds(),
        }
    }
}

fn default_calls_per_window() -> u32 {
    120
}

fn default_window_seconds() -> u64 {
    60
}

fn default_ipc_name() -> String {
    "tool-bridge".into()
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

/// Bridge configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Named pipe / Unix socket identifier the daemon listens on.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Interval of the correlator's expired-call sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Deadline settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Fan-out and queueing limits.
    #[serde(default)]
    pub limits: LimitConfig,
    /// Explore sub-agent settings.
    #[serde(default)]
    pub explore: ExploreConfig,
    /// Per-user rate limit.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ipc_name: default_ipc_name(),
            sweep_interval_ms: default_sweep_interval_ms(),
            timeouts: TimeoutConfig::default(),
            limits: LimitConfig::default(),
            explore: ExploreConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Default deadline for tools without a tool-specific one.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.default_seconds)
    }

    /// Upper bound applied to every effective deadline.
    #[must_use]
    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.max_seconds)
    }

    /// Grace period added to explicit tool timeouts.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.timeouts.grace_seconds)
    }

    /// Interval between correlator sweeps.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }

        let t = &self.timeouts;
        if t.default_seconds == 0 || t.bash_seconds == 0 || t.explore_seconds == 0 {
            return Err(AppError::Config(
                "timeouts must be greater than zero".into(),
            ));
        }
        if t.default_seconds > t.max_seconds || t.bash_seconds > t.max_seconds {
            return Err(AppError::Config(
                "tool timeouts must not exceed timeouts.max_seconds".into(),
            ));
        }

        if self.limits.max_batch_size == 0 {
            return Err(AppError::Config(
                "limits.max_batch_size must be greater than zero".into(),
            ));
        }
        if self.limits.max_pending_calls == 0 || self.limits.outbound_queue == 0 {
            return Err(AppError::Config(
                "limits.max_pending_calls and limits.outbound_queue must be greater than zero"
                    .into(),
            ));
        }

        if self.sweep_interval_ms == 0 {
            return Err(AppError::Config(
                "sweep_interval_ms must be greater than zero".into(),
            ));
        }

        if self.explore.max_steps == 0 || self.explore.event_buffer == 0 {
            return Err(AppError::Config(
                "explore.max_steps and explore.event_buffer must be greater than zero".into(),
            ));
        }

        if self.rate_limit.window_seconds == 0 {
            return Err(AppError::Config(
                "rate_limit.window_seconds must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
