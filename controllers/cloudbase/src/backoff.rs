//! # Requeue backoff
//!
//! Bounded exponential backoff for transient reconcile failures. The delay
//! doubles with each consecutive failure of the same identity, starting at
//! one second and capped at five minutes. The worker pool resets the count
//! on the first successful pass, so an identity that recovers starts over
//! at the base delay.

use std::time::Duration;

/// Delay before the first retry.
pub const BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on any retry delay.
pub const MAX_DELAY: Duration = Duration::from_secs(300);

/// Delay before the nth consecutive retry (1-indexed).
///
/// An attempt count of zero means no failures have been recorded and yields
/// no delay.
#[must_use]
pub fn delay_for_attempt(attempt: u32) -> Duration {
    delay_with(attempt, BASE_DELAY, MAX_DELAY)
}

/// Stateless backoff calculation with explicit bounds.
///
/// Doubling is capped well before the multiplier overflows, so large
/// attempt counts simply return `max`.
#[must_use]
pub fn delay_with(attempt: u32, base: Duration, max: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let exponent = attempt.saturating_sub(1).min(32);
    let delay = base.saturating_mul(2u32.saturating_pow(exponent));
    delay.min(max)
}
