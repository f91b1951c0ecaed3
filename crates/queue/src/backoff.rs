use rand::Rng;
use std::time::Duration;

/// Exponential delay for the `attempt`-th failure (1-based), capped, with jitter
/// drawn from the upper half of the window.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = base
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(cap);
    let half = exp / 2;
    let jitter_ms = rand::rng().random_range(0..=(exp - half).as_millis() as u64);
    half + Duration::from_millis(jitter_ms)
}
