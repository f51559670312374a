//! Configuration module for twinsync.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//!
//! Per-location runtime settings (sync locations, pause flag, ignore patterns)
//! are not part of this file; they live in the key-value configuration store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for twinsync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

/// Sync loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between the end of one cycle and the start of the next.
    pub interval_secs: u64,
    /// Directory holding the done-task journal and saved snapshots.
    pub data_dir: PathBuf,
    /// Seconds between storage checks while uploads are parked on a full quota.
    pub remote_poll_secs: u64,
}

/// Executor concurrency ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum uploads in flight.
    pub max_uploads: usize,
    /// Maximum downloads in flight.
    pub max_downloads: usize,
    /// Maximum deletes, uploads and downloads in flight together.
    pub max_tasks: usize,
}

/// Per-task retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before a transient failure becomes a conflict issue.
    pub max_tries: u32,
    /// Fixed delay between attempts, in milliseconds.
    pub delay_ms: u64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/twinsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("twinsync")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("twinsync"),
            remote_poll_secs: 30,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_uploads: 10,
            max_downloads: 10,
            max_tasks: 64,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_tries: 16,
            delay_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.interval_secs"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn non_zero(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- sync ---
        non_zero(&mut errors, "sync.interval_secs", self.sync.interval_secs);
        non_zero(
            &mut errors,
            "sync.remote_poll_secs",
            self.sync.remote_poll_secs,
        );
        if self.sync.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sync.data_dir".into(),
                message: "must not be empty".into(),
            });
        }

        // --- concurrency ---
        let c = &self.concurrency;
        non_zero(&mut errors, "concurrency.max_uploads", c.max_uploads as u64);
        non_zero(
            &mut errors,
            "concurrency.max_downloads",
            c.max_downloads as u64,
        );
        non_zero(&mut errors, "concurrency.max_tasks", c.max_tasks as u64);
        if c.max_tasks < c.max_uploads || c.max_tasks < c.max_downloads {
            errors.push(ValidationError {
                field: "concurrency.max_tasks".into(),
                message: format!(
                    "must be at least max_uploads ({}) and max_downloads ({})",
                    c.max_uploads, c.max_downloads
                ),
            });
        }

        // --- retry ---
        non_zero(&mut errors, "retry.max_tries", self.retry.max_tries as u64);

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}', expected one of: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Config`], starting from defaults.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder pre-populated with default values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- sync ---

    pub fn sync_interval_secs(mut self, seconds: u64) -> Self {
        self.config.sync.interval_secs = seconds;
        self
    }

    pub fn sync_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.sync.data_dir = dir.into();
        self
    }

    pub fn sync_remote_poll_secs(mut self, seconds: u64) -> Self {
        self.config.sync.remote_poll_secs = seconds;
        self
    }

    // --- concurrency ---

    pub fn max_uploads(mut self, n: usize) -> Self {
        self.config.concurrency.max_uploads = n;
        self
    }

    pub fn max_downloads(mut self, n: usize) -> Self {
        self.config.concurrency.max_downloads = n;
        self
    }

    pub fn max_tasks(mut self, n: usize) -> Self {
        self.config.concurrency.max_tasks = n;
        self
    }

    // --- retry ---

    pub fn retry_max_tries(mut self, n: u32) -> Self {
        self.config.retry.max_tries = n;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.delay_ms = ms;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
