use rand::Rng;
use std::time::Duration;

const INITIAL_DELAY_MS: u64 = 200;
const BACKOFF_FACTOR: f64 = 2.0;
const MAX_DELAY_MS: u64 = 30_000;

/// Delay before retry number `attempt` (1-based), exponential with jitter.
pub(crate) fn backoff(attempt: u64) -> Duration {
    let exp = BACKOFF_FACTOR.powi(attempt.saturating_sub(1) as i32);
    let base = ((INITIAL_DELAY_MS as f64 * exp) as u64).min(MAX_DELAY_MS);
    let jitter = rand::rng().random_range(0.9..1.1);
    Duration::from_millis((base as f64 * jitter) as u64)
}
