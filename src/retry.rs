//! Retry logic with exponential backoff
//!
//! Every storage and source call site wraps itself in a [`RetryPolicy`]. Only
//! errors that classify themselves as transient through [`IsRetryable`] are
//! retried; everything else propagates on the first failure.
//!
//! # Example
//!
//! ```
//! use quota_harvest::retry::{IsRetryable, RetryPolicy};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Flaky;
//!
//! impl std::fmt::Display for Flaky {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         f.write_str("flaky")
//!     }
//! }
//!
//! impl IsRetryable for Flaky {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(1));
//! let mut calls = 0;
//! let result = policy.run("example", || {
//!     calls += 1;
//!     if calls < 2 { Err(Flaky) } else { Ok(calls) }
//! });
//! assert_eq!(result.unwrap(), 2);
//! ```

use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, locked database, connection reset) return `true`.
/// Permanent failures (bad key, constraint violation, malformed response) return `false`.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// Bounded exponential backoff schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Builds a policy without jitter, doubling from `initial_delay`
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: initial_delay.saturating_mul(64),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out of attempts
    ///
    /// # Arguments
    ///
    /// * `label` - Name of the call site, used in log fields
    /// * `operation` - Closure returning `Result<T, E>` where `E` implements `IsRetryable`
    ///
    /// # Returns
    ///
    /// The successful result, or the last error once attempts are exhausted.
    pub fn run<T, E, F>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: IsRetryable + std::fmt::Display,
    {
        let mut attempt: u32 = 1;
        let mut delay = self.initial_delay;

        loop {
            match operation() {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(call = label, attempts = attempt, "Operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    tracing::warn!(
                        call = label,
                        error = %e,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Operation failed, retrying"
                    );

                    let wait = if self.jitter { add_jitter(delay) } else { delay };
                    std::thread::sleep(wait);

                    attempt += 1;
                    let next = Duration::from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier);
                    delay = next.min(self.max_delay);
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::error!(
                            call = label,
                            error = %e,
                            attempts = attempt,
                            "Operation failed after all retry attempts exhausted"
                        );
                    } else {
                        tracing::debug!(call = label, error = %e, "Operation failed with non-retryable error");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Spreads a delay uniformly over `[delay, 2 * delay]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + factor))
}
