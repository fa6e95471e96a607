use std::time::Duration;

use rand::Rng;

use crate::mutation_fn::MutationError;

/// First-retry backoff in milliseconds.
pub const BASE_DELAY_MS: u64 = 1_000;
/// Backoff ceiling in milliseconds.
pub const MAX_DELAY_MS: u64 = 60_000;

/// Decides retry versus permanent failure and spaces out attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, jitter: bool) -> Self {
        Self {
            max_retries,
            jitter,
        }
    }

    /// A permanently rejected mutation or an exhausted budget ends the
    /// transaction; anything else gets another attempt.
    pub fn should_retry(&self, error: &MutationError, retry_count: u32) -> bool {
        !error.is_non_retriable() && retry_count < self.max_retries
    }

    /// Exponential backoff: `min(60s, 1s · 2^retry_count)`, optionally
    /// scaled by a uniform factor in `[0.5, 1.5]` and rounded to whole
    /// milliseconds.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponential = 2u64
            .checked_pow(retry_count)
            .and_then(|factor| factor.checked_mul(BASE_DELAY_MS))
            .unwrap_or(MAX_DELAY_MS);
        let mut millis = exponential.min(MAX_DELAY_MS);

        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.5);
            millis = (millis as f64 * factor).round() as u64;
        }

        Duration::from_millis(millis)
    }
}
