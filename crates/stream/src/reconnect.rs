//! Exponential-backoff policy for the push-channel connection.
//!
//! The connection task consults [`delay_for_attempt`] between
//! reconnection attempts. Attempts are 0-indexed; the counter resets
//! when a connection opens successfully, and once it reaches
//! [`ReconnectConfig::max_attempts`] the client gives up and parks in
//! the `Failed` state until an explicit `connect()` call.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Number of consecutive failed attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 8,
        }
    }
}

/// Backoff delay for the given 0-indexed attempt number.
///
/// Computes `base_delay * 2^attempt`, clamped to
/// [`ReconnectConfig::max_delay`].
pub fn delay_for_attempt(attempt: u32, config: &ReconnectConfig) -> Duration {
    // Cap the shift so the multiplication cannot overflow; delays that
    // large are clamped to max_delay anyway.
    let factor = 1u64 << attempt.min(20);
    let ms = (config.base_delay.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(ms).min(config.max_delay)
}
