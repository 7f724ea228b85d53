//! # Fibonacci Backoff
//!
//! Provides a Fibonacci-based backoff mechanism for retries. The sequence
//! grows more slowly than exponential backoff, so a flapping broker
//! connection gets retried a few times within a work item without the item
//! stalling for minutes.
//!
//! Sequence with min=1 max=8: 1s, 1s, 2s, 3s, 5s, 8s (max).

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, capped at a maximum.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff value in seconds (for reset)
    min_secs: u64,
    /// Previous backoff value in seconds
    prev_secs: u64,
    /// Current backoff value in seconds
    current_secs: u64,
    /// Maximum backoff value in seconds
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with the given bounds in seconds
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = Duration::from_secs(self.current_secs);

        let next_secs = self.prev_secs + self.current_secs;
        self.prev_secs = self.current_secs;
        self.current_secs = std::cmp::min(next_secs, self.max_secs);

        result
    }

    /// Reset the backoff to the initial state after a success
    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs;
    }
}
