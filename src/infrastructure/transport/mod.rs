pub mod poll;
pub mod sse;

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter, shared by both transports.
/// `attempt` is zero-based; the delay doubles per attempt and is capped.
pub fn backoff_delay(attempt: u32, initial_ms: u64, max_ms: u64, jitter_ms: u64) -> Duration {
    let exp = initial_ms.saturating_mul(1u64 << attempt.min(16));
    let capped = exp.min(max_ms);
    let jitter = if jitter_ms > 0 {
        rand::rng().random_range(0..=jitter_ms)
    } else {
        0
    };
    Duration::from_millis(capped + jitter)
}
