//! Exponential backoff with optional jitter.

use rand::Rng;
use std::time::Duration;

/// Calculate the delay to wait after failed attempt number `attempt` (1-based).
///
/// `base * 2^(attempt-1)`, capped at `max`, plus up to `jitter_ratio` of the
/// capped delay. A ratio of 0 gives exact delays.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration, jitter_ratio: f64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u32.saturating_pow(attempt - 1);
    let capped_delay = base.saturating_mul(exponential_base).min(max);

    let ratio = if jitter_ratio.is_finite() {
        jitter_ratio.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let jitter_range = capped_delay.mul_f64(ratio).as_millis() as u64;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    capped_delay + Duration::from_millis(jitter)
}

/// Doubling delay schedule used by the backoff retrier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffSchedule {
    pub initial: Duration,
    pub max: Duration,
    pub jitter_ratio: f64,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            jitter_ratio: 0.0,
        }
    }
}

impl BackoffSchedule {
    /// Delay after failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.initial, self.max, self.jitter_ratio)
    }
}
