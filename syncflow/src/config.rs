//! Engine configuration.
//!
//! Values come from defaults, an optional JSON file, and `SYNCFLOW_*`
//! environment variables.

use crate::errors::SyncflowError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level directive when `SYNCFLOW_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Configuration for pipeline execution, persistence and the DLQ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncflowConfig {
    /// Directory for `pipeline_state_*.json` checkpoints.
    #[serde(default = "default_dir")]
    pub state_dir: PathBuf,
    /// Directory for result reports.
    #[serde(default = "default_dir")]
    pub report_dir: PathBuf,
    /// Directory for DLQ batch files.
    #[serde(default = "default_dlq_dir")]
    pub dlq_dir: PathBuf,
    /// Number of items buffered before a DLQ batch is flushed.
    #[serde(default = "default_dlq_batch_size")]
    pub dlq_batch_size: usize,
    /// Backoff unit in milliseconds; retry `n` waits `unit * 2^n`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Size of the worker pool for blocking executors.
    #[serde(default = "default_max_blocking_workers")]
    pub max_blocking_workers: usize,
    /// Write a checkpoint every time a step settles.
    #[serde(default)]
    pub checkpoint_each_step: bool,
    /// Timeout for steps that do not set their own.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Retry count for steps that do not set their own.
    #[serde(default = "default_retries")]
    pub default_retries: u32,
    /// Logging options.
    #[serde(default)]
    pub log: LogConfig,
}

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_dlq_dir() -> PathBuf {
    PathBuf::from("dlq")
}

fn default_dlq_batch_size() -> usize {
    100
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_max_blocking_workers() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_retries() -> u32 {
    3
}

impl Default for SyncflowConfig {
    fn default() -> Self {
        Self {
            state_dir: default_dir(),
            report_dir: default_dir(),
            dlq_dir: default_dlq_dir(),
            dlq_batch_size: default_dlq_batch_size(),
            backoff_base_ms: default_backoff_base_ms(),
            max_blocking_workers: default_max_blocking_workers(),
            checkpoint_each_step: false,
            default_timeout_secs: default_timeout_secs(),
            default_retries: default_retries(),
            log: LogConfig::default(),
        }
    }
}

impl SyncflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SyncflowError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Builds a configuration from `SYNCFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, SyncflowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("SYNCFLOW_STATE_DIR") {
            config.state_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SYNCFLOW_REPORT_DIR") {
            config.report_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SYNCFLOW_DLQ_DIR") {
            config.dlq_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SYNCFLOW_DLQ_BATCH_SIZE") {
            config.dlq_batch_size = parse_var("SYNCFLOW_DLQ_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("SYNCFLOW_BACKOFF_BASE_MS") {
            config.backoff_base_ms = parse_var("SYNCFLOW_BACKOFF_BASE_MS", &v)?;
        }
        if let Some(v) = lookup("SYNCFLOW_MAX_BLOCKING_WORKERS") {
            config.max_blocking_workers = parse_var("SYNCFLOW_MAX_BLOCKING_WORKERS", &v)?;
        }
        if let Some(v) = lookup("SYNCFLOW_CHECKPOINT_EACH_STEP") {
            config.checkpoint_each_step = parse_bool(&v);
        }
        if let Some(v) = lookup("SYNCFLOW_DEFAULT_TIMEOUT_SECS") {
            config.default_timeout_secs = parse_var("SYNCFLOW_DEFAULT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("SYNCFLOW_MAX_RETRIES") {
            config.default_retries = parse_var("SYNCFLOW_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("SYNCFLOW_LOG_LEVEL") {
            config.log.level = v;
        }
        if let Some(v) = lookup("SYNCFLOW_LOG_JSON") {
            config.log.json = parse_bool(&v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), SyncflowError> {
        if self.dlq_batch_size == 0 {
            return Err(SyncflowError::Settings(
                "dlq_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_blocking_workers == 0 {
            return Err(SyncflowError::Settings(
                "max_blocking_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the state directory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Sets the report directory.
    #[must_use]
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    /// Sets the DLQ directory.
    #[must_use]
    pub fn with_dlq_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dlq_dir = dir.into();
        self
    }

    /// Sets the backoff unit.
    #[must_use]
    pub fn with_backoff_base_ms(mut self, base: u64) -> Self {
        self.backoff_base_ms = base;
        self
    }

    /// Sets the blocking worker pool size.
    #[must_use]
    pub fn with_max_blocking_workers(mut self, workers: usize) -> Self {
        self.max_blocking_workers = workers;
        self
    }

    /// Enables or disables per-step checkpoints.
    #[must_use]
    pub fn with_checkpoint_each_step(mut self, enabled: bool) -> Self {
        self.checkpoint_each_step = enabled;
        self
    }

    /// Returns the default step timeout.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SyncflowError> {
    value
        .trim()
        .parse()
        .map_err(|_| SyncflowError::Settings(format!("{key} has an invalid value '{value}'")))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
