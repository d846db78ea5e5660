//! Capped exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Share of the delay that may be shaved off at random.
const JITTER_DIVISOR: u32 = 10;

/// Delay before retrying after `failed` consecutive failures.
///
/// Doubles `base` per failure and caps at `max`, then removes up to 10% at
/// random so concurrent clients do not reconnect in lockstep. The result
/// never exceeds `max`. Zero failures means no delay.
pub fn exponential_delay(base: Duration, failed: u32, max: Duration) -> Duration {
    if failed == 0 {
        return Duration::ZERO;
    }

    let factor = 2u32.checked_pow(failed - 1).unwrap_or(u32::MAX);
    let capped = base.checked_mul(factor).map_or(max, |d| d.min(max));

    let spread = capped / JITTER_DIVISOR;
    if spread.is_zero() {
        return capped;
    }
    capped - rand::thread_rng().gen_range(Duration::ZERO..spread)
}
