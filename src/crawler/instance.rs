//! Per-worker settings
//!
//! [`WorkerSettings`] is the slice of [`Config`] a single
//! [`WorkerLoop`](super::worker::WorkerLoop) needs: batch size, the rate
//! limiter's delay window and the attempt policy for failed items.

use std::time::Duration;

use crate::config::{Config, ConfigError};
use crate::utils::retry::AttemptPolicy;

// ============================================================================
// Worker Settings
// ============================================================================

/// Settings for one worker loop
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Items claimed per batch
    pub batch_size: usize,

    /// Lower bound of the inter-dispatch delay
    pub min_delay: Duration,

    /// Upper bound of the inter-dispatch delay
    pub max_delay: Duration,

    /// Backoff and poison threshold for failed items
    pub attempt_policy: AttemptPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2000),
            attempt_policy: AttemptPolicy::default(),
        }
    }
}

impl WorkerSettings {
    /// Derive worker settings from the application configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.worker.batch_size,
            min_delay: config.min_delay(),
            max_delay: config.max_delay(),
            attempt_policy: config.attempt_policy(),
        }
    }

    /// Create settings with builder pattern
    pub fn builder() -> WorkerSettingsBuilder {
        WorkerSettingsBuilder::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "batch_size".to_string(),
                "Must be at least 1".to_string(),
            ));
        }

        if self.min_delay > self.max_delay {
            return Err(ConfigError::InvalidValue(
                "min_delay".to_string(),
                "Must not exceed max_delay".to_string(),
            ));
        }

        if self.attempt_policy.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "max_attempts".to_string(),
                "Must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Worker Settings Builder
// ============================================================================

/// Builder for WorkerSettings
#[derive(Debug, Default)]
pub struct WorkerSettingsBuilder {
    batch_size: Option<usize>,
    min_delay: Option<Duration>,
    max_delay: Option<Duration>,
    attempt_policy: Option<AttemptPolicy>,
}

impl WorkerSettingsBuilder {
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set both ends of the delay window
    pub fn delay(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = Some(min);
        self.max_delay = Some(max);
        self
    }

    /// Dispatch without pacing
    pub fn no_delay(self) -> Self {
        self.delay(Duration::ZERO, Duration::ZERO)
    }

    pub fn attempt_policy(mut self, policy: AttemptPolicy) -> Self {
        self.attempt_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<WorkerSettings, ConfigError> {
        let defaults = WorkerSettings::default();
        let settings = WorkerSettings {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            min_delay: self.min_delay.unwrap_or(defaults.min_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            attempt_policy: self.attempt_policy.unwrap_or(defaults.attempt_policy),
        };

        settings.validate()?;
        Ok(settings)
    }
}
