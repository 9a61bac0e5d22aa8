use rand::Rng;
use std::time::Duration;

/// Trait defining a fill-latency simulation model.
pub trait LatencyModel: Send + Sync {
    /// Returns the delay before the synthetic fill lands.
    fn next_latency(&self) -> Duration;
}

/// Uniform latency in `[min_ms, max_ms]`. Simulates network RTT plus
/// venue processing time for paper fills.
#[derive(Debug, Clone)]
pub struct UniformLatency {
    min_ms: u64,
    max_ms: u64,
}

impl UniformLatency {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: max_ms.max(min_ms),
        }
    }
}

impl LatencyModel for UniformLatency {
    fn next_latency(&self) -> Duration {
        let mut rng = rand::rng();
        Duration::from_millis(rng.random_range(self.min_ms..=self.max_ms))
    }
}

/// Zero latency model (instant fills) for tests.
pub struct ZeroLatency;

impl LatencyModel for ZeroLatency {
    fn next_latency(&self) -> Duration {
        Duration::from_millis(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_latency_range() {
        let model = UniformLatency::new(20, 150);
        for _ in 0..100 {
            let lat = model.next_latency().as_millis() as u64;
            assert!(
                (20..=150).contains(&lat),
                "Latency {} out of bounds [20, 150]",
                lat
            );
        }
    }

    #[test]
    fn test_inverted_bounds_are_normalized() {
        let model = UniformLatency::new(150, 20);
        let lat = model.next_latency().as_millis() as u64;
        assert!((20..=150).contains(&lat));
    }
}
