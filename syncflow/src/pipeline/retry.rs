//! Retry backoff for failed step attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff without jitter: retry after attempt `n` waits
/// `base * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on a single delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 3_600_000,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy with the given base delay.
    #[must_use]
    pub fn new(base_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            ..Self::default()
        }
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Delay before the retry that follows attempt number `attempts`.
    #[must_use]
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempts);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Returns true while another attempt is allowed: `retries` counts the
/// retries after the first attempt.
#[must_use]
pub const fn should_retry(attempts: u32, retries: u32) -> bool {
    attempts <= retries
}
