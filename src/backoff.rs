//! Retry scheduling with exponential backoff and jitter.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

/// Default base delay before the first retry: 1 minute.
pub const DEFAULT_BASE_DELAY_MS: u64 = 60_000;

/// Default delay ceiling: 1 hour.
pub const DEFAULT_MAX_DELAY_MS: u64 = 3_600_000;

/// Fraction of the capped delay added as random jitter (upper bound).
const JITTER_FRACTION: f64 = 0.30;

/// Computes retry instants from an attempt count.
///
/// `delay = min(base * 2^attempt, max)` plus a uniform random jitter of
/// 0-30% of the capped delay, so many deliveries failing at the same moment
/// do not retry in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct BackoffCalculator {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl BackoffCalculator {
    #[must_use]
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// The capped exponential delay for an attempt, before jitter.
    #[must_use]
    pub fn base_delay_for(&self, attempt_number: u32) -> u64 {
        let multiplier = 2u64.saturating_pow(attempt_number);
        self.base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms)
    }

    /// The full delay for an attempt, jitter included.
    #[must_use]
    pub fn delay_for(&self, attempt_number: u32) -> u64 {
        let base = self.base_delay_for(attempt_number);
        let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FRACTION);
        base + (base as f64 * jitter) as u64
    }

    /// The instant at which the next attempt should run.
    ///
    /// `attempt_number` is the 0-based index of the attempt that just
    /// failed, so the first retry waits roughly the base delay.
    #[must_use]
    pub fn next_retry_at(&self, attempt_number: u32) -> DateTime<Utc> {
        Utc::now() + Duration::milliseconds(self.delay_for(attempt_number) as i64)
    }
}
