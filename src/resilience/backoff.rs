//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Jitter of up to 10% of the delay
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Delay schedule for a listener whose `accept` keeps failing.
///
/// Each consecutive failure doubles the pause, up to `max_ms`. A successful
/// accept resets the schedule.
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    attempt: u32,
    base_ms: u64,
    max_ms: u64,
}

impl AcceptBackoff {
    pub const DEFAULT_BASE_MS: u64 = 5;
    pub const DEFAULT_MAX_MS: u64 = 1_000;

    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            attempt: 0,
            base_ms,
            max_ms,
        }
    }

    /// Register a failure and return how long to pause before the next accept.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        calculate_backoff(self.attempt, self.base_ms, self.max_ms)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.attempt
    }
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE_MS, Self::DEFAULT_MAX_MS)
    }
}
