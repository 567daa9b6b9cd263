//! Linear retry schedule for bulk writes.

use std::time::Duration;

use backoff::backoff::Backoff;

/// Waits `base * n` after the n-th failed attempt, for at most
/// `max_attempts` attempts in total.
///
/// `next_backoff` returns `None` once the n-th failure reaches the ceiling,
/// so a loop that retries on `Some` makes exactly `max_attempts` attempts.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    max_attempts: u32,
    failures: u32,
}

impl LinearBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            failures: 0,
        }
    }

    /// Failed attempts recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.failures = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }
        Some(self.base * self.failures)
    }
}
