//! Backoff policy for push-connection reconnection.
//!
//! The delay before reconnection attempt `n` (1-based) is
//! `initial_delay * multiplier^(n-1)`, clamped to `max_delay`, plus an
//! optional random jitter. A multiplier of `1.0` gives a fixed interval.
//! After `max_attempts` consecutive failures the circuit breaker in
//! [`crate::state`] stops scheduling attempts altogether.

use std::time::Duration;

use rand::Rng;

/// Tunable parameters for the reconnection strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Consecutive failed attempts before the circuit opens.
    pub max_attempts: u32,
    /// Fraction of the delay (`0.0..=1.0`) added as random jitter.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
            max_attempts: 5,
            jitter: 0.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier.max(1.0)) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Base delay (without jitter) before reconnection attempt `attempt`.
///
/// `attempt` is 1-based; `0` is treated as the first attempt.
pub fn delay_for_attempt(attempt: u32, config: &ReconnectConfig) -> Duration {
    let mut delay = config.initial_delay.min(config.max_delay);
    for _ in 1..attempt.max(1) {
        delay = next_delay(delay, config);
        if delay == config.max_delay {
            break;
        }
    }
    delay
}

/// Add up to `config.jitter * delay` of random extra wait.
pub fn with_jitter(delay: Duration, config: &ReconnectConfig) -> Duration {
    let fraction = config.jitter.clamp(0.0, 1.0);
    if fraction == 0.0 || delay.is_zero() {
        return delay;
    }
    let extra_ms = rand::rng().random_range(0.0..=delay.as_millis() as f64 * fraction);
    delay + Duration::from_millis(extra_ms as u64)
}
