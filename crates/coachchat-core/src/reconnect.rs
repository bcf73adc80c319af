//! Reconnection backoff bookkeeping.
//!
//! Delay for attempt `n` (1-indexed) is `base_delay * 2^(n-1)`. The counter is
//! reset on every successful connect.

use std::time::Duration;

/// Default number of automatic reconnect attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Next step of the backoff sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Schedule a single retry after `delay`.
    Retry {
        /// Attempt number (1-indexed).
        attempt: u32,
        /// Delay before the retry fires.
        delay: Duration,
    },
    /// Attempts exceeded the limit.
    Exhausted {
        /// Number of attempts that were made.
        attempts: u32,
    },
}

/// Exponential backoff state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY)
    }
}

impl ReconnectPolicy {
    /// Create a policy with the counter at zero.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { attempt: 0, max_attempts, base_delay }
    }

    /// Attempts made since the last successful connect.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempt limit.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first attempt.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Check if the attempt counter went past the limit.
    pub fn is_exhausted(&self) -> bool {
        self.attempt > self.max_attempts
    }

    /// Delay for 1-indexed `attempt`. Attempt 0 is treated as 1.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Advance the counter and return what to do next.
    pub fn next_attempt(&mut self) -> Backoff {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt > self.max_attempts {
            Backoff::Exhausted { attempts: self.max_attempts }
        } else {
            Backoff::Retry { attempt: self.attempt, delay: self.delay_for(self.attempt) }
        }
    }

    /// Reset the counter after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
