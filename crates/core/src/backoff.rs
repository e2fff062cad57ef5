//! Retry delay policy shared by every monitor loop.

use std::time::Duration;

/// Exponential backoff over the polling interval.
///
/// After `n` consecutive failures the delay is `interval * 2^min(n, 8)`,
/// capped at `max(interval, cap)`. A success resets the counter.
#[derive(Debug, Clone)]
pub struct Backoff {
    failures: u32,
    cap: Duration,
}

impl Backoff {
    pub const MAX_EXPONENT: u32 = 8;
    pub const DEFAULT_CAP: Duration = Duration::from_secs(300);

    pub fn new() -> Self {
        Self::with_cap(Self::DEFAULT_CAP)
    }

    pub fn with_cap(cap: Duration) -> Self {
        Self { failures: 0, cap }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Delay before the next cycle given the current polling interval.
    pub fn next_delay(&self, interval: Duration) -> Duration {
        if self.failures == 0 {
            return interval;
        }
        let factor = 1u32 << self.failures.min(Self::MAX_EXPONENT);
        let cap = self.cap.max(interval);
        interval.saturating_mul(factor).min(cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
