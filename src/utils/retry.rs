//! Retry utilities for resilient operations
//!
//! This module provides the exponential backoff used for immediate retries of
//! transient request failures, and the attempt policy that spaces out and
//! eventually stops reclaiming backlog items whose processing keeps failing.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom max retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a retry configuration with custom delays
    pub fn with_delays(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before retry number `attempt` (attempt 0 runs immediately)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = if attempt == 0 {
            0
        } else {
            let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
            let exponential = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
            if exponential.is_finite() {
                (exponential as u64).min(self.max_delay_ms)
            } else {
                self.max_delay_ms
            }
        };

        Duration::from_millis(delay_ms)
    }
}

/// Backoff and poison threshold for backlog items that fail processing
#[derive(Debug, Clone)]
pub struct AttemptPolicy {
    /// Attempts after which an item is poisoned and never reclaimed
    pub max_attempts: u32,

    /// Backoff between attempts
    pub backoff: RetryConfig,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self::new(5, RetryConfig::with_delays(u32::MAX, 60_000, 3_600_000))
    }
}

impl AttemptPolicy {
    pub fn new(max_attempts: u32, backoff: RetryConfig) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Policy without backoff, handy for tests and one-shot runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, RetryConfig::with_delays(u32::MAX, 0, 0))
    }

    /// Whether an item with `attempts` failed attempts should stop being reclaimed
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// How long an item waits before it may be claimed again after `attempts` failures
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        self.backoff.calculate_delay(attempts)
    }
}

/// Execute an operation with retry logic, using a custom retry predicate
///
/// The operation is retried with exponential backoff while `should_retry`
/// accepts the error and attempts remain. The last error is returned otherwise.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        // Apply exponential backoff for retries
        if attempt > 0 {
            let delay = config.calculate_delay(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_retries || !should_retry(&e) {
                    return Err(e);
                }
                warn!(
                    attempt = attempt,
                    max_retries = config.max_retries,
                    error = %e,
                    "Operation failed, will retry"
                );
                attempt += 1;
            }
        }
    }
}
