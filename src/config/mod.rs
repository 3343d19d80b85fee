//! Configuration management for the harvester
//!
//! This module handles loading and validating configuration from environment variables,
//! TOML files, and command-line overrides.
//!
//! Environment variables (all optional, applied on top of file/default values):
//! - `HARVESTER_DB_PATH`: SQLite backlog path [default: data/backlog.db]
//! - `HARVESTER_WORKERS`: Number of workers, 1-20 [default: 4]
//! - `HARVESTER_WORKER_ID`: Worker identity for single-worker runs
//! - `HARVESTER_WORKER_PREFIX`: Prefix for supervised worker ids [default: worker]
//! - `HARVESTER_BATCH_SIZE`: Items claimed per batch [default: 5]
//! - `HARVESTER_MIN_DELAY_MS` / `HARVESTER_MAX_DELAY_MS`: Politeness jitter window
//! - `HARVESTER_MAX_ATTEMPTS`: Attempts before an item is poisoned [default: 5]
//! - `HARVESTER_LEASE_TTL_SECS`: Lease time-to-live; unset disables the reaper
//! - `HARVESTER_LOGIN_URL`, `HARVESTER_USERNAME`, `HARVESTER_PASSWORD`: Session credentials
//! - `HARVESTER_LOG_LEVEL`, `HARVESTER_LOG_FORMAT`: Logging

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::models::WorkerId;
use crate::utils::retry::{AttemptPolicy, RetryConfig};

/// Smallest worker pool the supervisor accepts
pub const MIN_WORKERS: usize = 1;

/// Largest worker pool the supervisor accepts
pub const MAX_WORKERS: usize = 20;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backlog store configuration
    pub backlog: BacklogConfig,

    /// Worker pool configuration
    pub worker: WorkerConfig,

    /// Lease expiry configuration
    pub lease: LeaseConfig,

    /// External session configuration
    pub session: SessionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Backlog store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacklogConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    pub count: usize,

    /// Explicit worker identity for single-worker runs
    pub worker_id: Option<String>,

    /// Prefix for supervised worker ids (`{prefix}-{n}`)
    pub id_prefix: String,

    /// Items claimed per batch
    pub batch_size: usize,

    /// Lower bound of the inter-dispatch delay in milliseconds
    pub min_delay_ms: u64,

    /// Upper bound of the inter-dispatch delay in milliseconds
    pub max_delay_ms: u64,

    /// Attempts before an item stops being reclaimed
    pub max_attempts: u32,

    /// Base backoff after a failed attempt, in milliseconds
    pub backoff_base_ms: u64,

    /// Backoff cap, in milliseconds
    pub backoff_max_ms: u64,
}

/// Lease expiry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Leases older than this are reclaimed by the reaper; `None` disables it
    pub ttl_secs: Option<u64>,

    /// Reaper sweep interval in seconds
    pub sweep_interval_secs: u64,
}

/// External session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Form login endpoint
    pub login_url: Option<String>,

    /// Login username
    pub username: Option<String>,

    /// Login password
    pub password: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Retries for transient request failures
    pub max_retries: u32,

    /// User agent string
    pub user_agent: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/backlog.db"),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            worker_id: None,
            id_prefix: String::from("worker"),
            batch_size: 5,
            min_delay_ms: 1000,
            max_delay_ms: 2000,
            max_attempts: 5,
            backoff_base_ms: 60_000,
            backoff_max_ms: 3_600_000,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: None,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_url: None,
            username: None,
            password: None,
            timeout_secs: 30,
            max_retries: 3,
            user_agent: format!("harvester/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl SessionConfig {
    /// Whether both halves of the credentials are present
    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty()) && self.password.is_some()
    }
}

impl Config {
    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ParseError(format!("Failed to read {}: {e}", path.display()))
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| {
            ConfigError::ParseError(format!("Failed to parse {}: {e}", path.display()))
        })?;

        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `HARVESTER_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = env_string("HARVESTER_DB_PATH") {
            self.backlog.sqlite_path = path.into();
        }

        if let Some(count) = env_parse("HARVESTER_WORKERS")? {
            self.worker.count = count;
        }
        if let Some(id) = env_string("HARVESTER_WORKER_ID") {
            self.worker.worker_id = Some(id);
        }
        if let Some(prefix) = env_string("HARVESTER_WORKER_PREFIX") {
            self.worker.id_prefix = prefix;
        }
        if let Some(size) = env_parse("HARVESTER_BATCH_SIZE")? {
            self.worker.batch_size = size;
        }
        if let Some(ms) = env_parse("HARVESTER_MIN_DELAY_MS")? {
            self.worker.min_delay_ms = ms;
        }
        if let Some(ms) = env_parse("HARVESTER_MAX_DELAY_MS")? {
            self.worker.max_delay_ms = ms;
        }
        if let Some(attempts) = env_parse("HARVESTER_MAX_ATTEMPTS")? {
            self.worker.max_attempts = attempts;
        }

        if let Some(ttl) = env_parse("HARVESTER_LEASE_TTL_SECS")? {
            self.lease.ttl_secs = Some(ttl);
        }

        if let Some(url) = env_string("HARVESTER_LOGIN_URL") {
            self.session.login_url = Some(url);
        }
        if let Some(username) = env_string("HARVESTER_USERNAME") {
            self.session.username = Some(username);
        }
        if let Some(password) = env_string("HARVESTER_PASSWORD") {
            self.session.password = Some(password);
        }

        if let Some(level) = env_string("HARVESTER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env_string("HARVESTER_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.worker.count) {
            return Err(ConfigError::InvalidValue(
                "worker.count".to_string(),
                format!("must be between {MIN_WORKERS} and {MAX_WORKERS}"),
            ));
        }

        if self.worker.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "worker.batch_size".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        if self.worker.min_delay_ms > self.worker.max_delay_ms {
            return Err(ConfigError::InvalidValue(
                "worker.min_delay_ms".to_string(),
                "must not exceed worker.max_delay_ms".to_string(),
            ));
        }

        if self.worker.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "worker.max_attempts".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        if self.worker.id_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "worker.id_prefix".to_string(),
                "cannot be empty".to_string(),
            ));
        }

        if let Some(ttl) = self.lease.ttl_secs {
            if ttl == 0 {
                return Err(ConfigError::InvalidValue(
                    "lease.ttl_secs".to_string(),
                    "must be greater than 0".to_string(),
                ));
            }
            if self.lease.sweep_interval_secs == 0 {
                return Err(ConfigError::InvalidValue(
                    "lease.sweep_interval_secs".to_string(),
                    "must be greater than 0".to_string(),
                ));
            }
            let bound = self.batch_bound();
            if Duration::from_secs(ttl) < bound {
                return Err(ConfigError::InvalidValue(
                    "lease.ttl_secs".to_string(),
                    format!(
                        "must be at least {}s to cover one batch of {} items",
                        bound.as_secs_f64().ceil(),
                        self.worker.batch_size
                    ),
                ));
            }
        }

        if self.logging.format != "text" && self.logging.format != "json" {
            return Err(ConfigError::InvalidValue(
                "logging.format".to_string(),
                "must be 'text' or 'json'".to_string(),
            ));
        }

        Ok(())
    }

    /// Worker identity for a single-worker run
    pub fn worker_id(&self) -> Result<WorkerId, ConfigError> {
        let raw = self
            .worker
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("{}-0", self.worker.id_prefix));
        WorkerId::new(raw).ok_or_else(|| {
            ConfigError::InvalidValue("worker.worker_id".to_string(), "cannot be empty".to_string())
        })
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.worker.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.worker.max_delay_ms)
    }

    pub fn lease_ttl(&self) -> Option<Duration> {
        self.lease.ttl_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.lease.sweep_interval_secs)
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.session.timeout_secs)
    }

    /// Longest a worker may hold a claim: every throttle gap in a batch plus
    /// one fully retried request
    pub fn batch_bound(&self) -> Duration {
        let items = u32::try_from(self.worker.batch_size).unwrap_or(u32::MAX);
        let fetch = self
            .request_timeout()
            .saturating_mul(self.session.max_retries.saturating_add(1));
        self.max_delay().saturating_mul(items).saturating_add(fetch)
    }

    /// Retry/poison policy applied to failed item attempts
    pub fn attempt_policy(&self) -> AttemptPolicy {
        AttemptPolicy::new(
            self.worker.max_attempts,
            RetryConfig::with_delays(
                u32::MAX,
                self.worker.backoff_base_ms,
                self.worker.backoff_max_ms,
            ),
        )
    }

    /// Display configuration (with credentials masked)
    pub fn display(&self) -> String {
        format!(
            "Harvester Configuration\n\
             {:-<50}\n\
             Backlog: {}\n\
             Workers: {} (prefix '{}')\n\
             Batch Size: {}\n\
             Delay Window: {}-{}ms\n\
             Max Attempts: {}\n\
             Lease TTL: {}\n\
             Login URL: {}\n\
             Username: {}\n\
             Password: {}",
            "",
            self.backlog.sqlite_path.display(),
            self.worker.count,
            self.worker.id_prefix,
            self.worker.batch_size,
            self.worker.min_delay_ms,
            self.worker.max_delay_ms,
            self.worker.max_attempts,
            self.lease
                .ttl_secs
                .map(|s| format!("{s}s"))
                .unwrap_or_else(|| "disabled".to_string()),
            self.session.login_url.as_deref().unwrap_or("-"),
            self.session.username.as_deref().unwrap_or("-"),
            if self.session.password.is_some() { "***" } else { "-" },
        )
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), format!("cannot parse '{raw}'"))),
        None => Ok(None),
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid value
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),
}
