//! Retry policy for failed job executions.
//!
//! Implements exponential backoff with configurable parameters.

use crate::config::QueueSettings;
use crate::error::QueueError;
use std::time::Duration;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone, PartialEq)]
///
/// The attempt limit is not part of the policy: it is stamped on each job at
/// enqueue and passed to `should_retry`.
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub multiplier: f64,
    /// Cap for exponential growth.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(settings: &QueueSettings) -> Self {
        Self {
            base_delay: settings.backoff_base,
            multiplier: settings.backoff_multiplier,
            max_delay: settings.max_backoff,
        }
    }

    /// Delay before the next execution, given how many have already concluded.
    ///
    /// `base * multiplier^(attempts_made - 1)`, capped at `max_delay`.
    pub fn backoff_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Returns true if the error is retryable and the job has attempts left.
    pub fn should_retry(&self, error: &QueueError, attempts_made: u32, max_attempts: u32) -> bool {
        error.is_retryable() && attempts_made < max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&QueueSettings::default())
    }
}
