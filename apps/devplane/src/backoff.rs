//! # Fibonacci Backoff
//!
//! Progressive delay between retries of a single cluster call. Grows more
//! slowly than exponential backoff, so a handful of bounded retries stays
//! within a few seconds of wall time.
//!
//! Sequence with the defaults: 500ms, 500ms, 1s, 1.5s, 2.5s, 4s, 5s (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev_ms: u64,
    current_ms: u64,
    max_ms: u64,
}

impl FibonacciBackoff {
    /// Create a new backoff whose first two delays are `min`, capped at `max`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_ms = duration_ms(min);
        Self {
            prev_ms: 0,
            current_ms: min_ms,
            max_ms: duration_ms(max).max(min_ms),
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_ms;
        let next = self.prev_ms.saturating_add(self.current_ms);
        self.prev_ms = self.current_ms;
        self.current_ms = std::cmp::min(next, self.max_ms);
        Duration::from_millis(result)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Bounded retry settings for one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    pub fn backoff(&self) -> FibonacciBackoff {
        FibonacciBackoff::new(self.min_delay, self.max_delay)
    }
}
