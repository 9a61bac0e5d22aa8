use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // Normal operation - requests pass through
    Open,     // Failure threshold breached - reject until the probe time
    HalfOpen, // Single probe allowed to test recovery
}

/// Circuit breaker protecting a quote provider from cascading failures.
///
/// After `failure_threshold` consecutive failures the circuit opens and a
/// probe time is scheduled `cooldown` later. The first request at or after
/// the probe time moves the circuit to half-open; its outcome closes or
/// re-opens the circuit.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    cooldown: Duration,
    name: String,
}

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    next_probe: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                next_probe: None,
            }),
            failure_threshold,
            cooldown,
            name: name.into(),
        }
    }

    /// Whether a request may go out right now. Reaching the probe time
    /// transitions Open -> HalfOpen and admits exactly that probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let due = inner
                    .next_probe
                    .map(|probe| Instant::now() >= probe)
                    .unwrap_or(true);
                if due {
                    info!(
                        "CircuitBreaker [{}]: Transitioning Open -> HalfOpen (probe due)",
                        self.name
                    );
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        match inner.state {
            CircuitState::HalfOpen => {
                info!(
                    "CircuitBreaker [{}]: Transitioning HalfOpen -> Closed (probe succeeded)",
                    self.name
                );
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.next_probe = None;
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {
                warn!(
                    "CircuitBreaker [{}]: Success recorded in Open state (unexpected)",
                    self.name
                );
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        inner.failure_count += 1;

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.failure_threshold {
                    error!(
                        "CircuitBreaker [{}]: Transitioning Closed -> Open ({} failures)",
                        self.name, inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                    inner.next_probe = Some(Instant::now() + self.cooldown);
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    "CircuitBreaker [{}]: Transitioning HalfOpen -> Open (probe failed)",
                    self.name
                );
                inner.state = CircuitState::Open;
                inner.next_probe = Some(Instant::now() + self.cooldown);
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_opens_after_failures() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(cb.allow_request());
            cb.record_failure();
        }

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_probe_after_cooldown_closes_on_success() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_millis(20));

        for _ in 0..2 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));

        // Probe admitted, others rejected until the probe resolves.
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.allow_request());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow_request());
    }

    #[test]
    fn test_probe_failure_reopens() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_millis(20));

        for _ in 0..2 {
            cb.record_failure();
        }

        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.allow_request());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_success_resets_failure_count_when_closed() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(60));

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        // Never reached three consecutive failures.
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
