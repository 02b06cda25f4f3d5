//! Retry policy for transient store failures (contention, unavailability).

use std::time::Duration;

use rand::Rng;

/// Backoff between attempts of one store transaction.
///
/// Only transient store errors are retried; semantic errors (job not found, weight
/// underflow) are returned on the first attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No backoff at all; useful in tests that inject failures.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the `attempts`-th failed attempt (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1), capped at max_delay.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }

    /// `next_delay` scaled by a random factor in `[0.5, 1.0]`, so that tasks that
    /// collided on the same record do not retry in lockstep.
    pub fn jittered_delay(&self, attempts: u32) -> Duration {
        self.next_delay(attempts).mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }

    /// May another attempt follow the `attempts`-th failure?
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
