//! Redelivery backoff policy
//!
//! Failed deliveries are not retried in a tight loop inside the handler; the
//! queue schedules the next delivery attempt after an exponentially growing
//! delay. Keeping the policy here makes it testable without any transport.

use rand::Rng;
use std::time::Duration;

/// Configuration for redelivery behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of delivery attempts before dead-lettering
    pub max_attempts: u32,
    /// Initial backoff duration (doubles on each redelivery)
    pub initial_backoff: Duration,
    /// Maximum backoff duration to cap exponential growth
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Compute the redelivery delay after the given failed attempt (1-based).
///
/// Delay is `initial_backoff * 2^(attempt-1)` capped at `max_backoff`, plus
/// uniform jitter in `[0, initial_backoff)`. Because the doubled base always
/// grows by at least `initial_backoff`, successive delays are strictly
/// increasing until the cap is reached.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let base = config
        .initial_backoff
        .saturating_mul(1u32 << exponent)
        .min(config.max_backoff);

    let jitter_ceiling = config.initial_backoff.as_millis() as u64;
    let jitter = if jitter_ceiling > 0 {
        Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ceiling))
    } else {
        Duration::ZERO
    };

    base + jitter
}
