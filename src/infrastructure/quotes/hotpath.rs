use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, warn};

use crate::infrastructure::observability::Metrics;

const LATENCY_RING_CAPACITY: usize = 256;
const OUTCOME_RING_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotpathConfig {
    pub max_live_calls_per_sec: u32,
    pub max_p95_latency_ms: f64,
    pub min_success_rate: f64,
    pub min_cache_hit_rate: f64,
    pub max_consecutive_breaches: u32,
    pub emergency_stop_duration_min: u64,
}

impl Default for HotpathConfig {
    fn default() -> Self {
        Self {
            max_live_calls_per_sec: 10,
            max_p95_latency_ms: 750.0,
            min_success_rate: 0.7,
            min_cache_hit_rate: 0.2,
            max_consecutive_breaches: 5,
            emergency_stop_duration_min: 10,
        }
    }
}

/// Pre-request rejection reasons, fail-closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotpathBlock {
    RateLimitExceeded,
    ProviderDegraded,
    BudgetExhausted,
    EmergencyStop,
}

impl fmt::Display for HotpathBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotpathBlock::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
            HotpathBlock::ProviderDegraded => write!(f, "provider_degraded"),
            HotpathBlock::BudgetExhausted => write!(f, "budget_exhausted"),
            HotpathBlock::EmergencyStop => write!(f, "emergency_stop"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
    Fatal,
}

impl Severity {
    fn label(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub invariant: String,
    pub severity: Severity,
    pub observed: f64,
    pub threshold: f64,
}

struct GuardInner {
    second_window: VecDeque<Instant>,
    latencies_ms: VecDeque<f64>,
    outcomes: VecDeque<bool>,
    cache_outcomes: VecDeque<bool>,
    consecutive_breaches: u32,
    emergency_until: Option<Instant>,
    recent_violations: VecDeque<Violation>,
}

/// Global invariant enforcer for the live-quote hotpath.
///
/// Pre-request checks fail closed on rate, health, budget, and the
/// emergency stop. Post-request checks watch latency P95, success rate,
/// and cache-hit rate; enough consecutive breaches trip the emergency
/// stop for a fixed duration.
pub struct HotpathGuard {
    cfg: HotpathConfig,
    inner: Mutex<GuardInner>,
    metrics: Metrics,
}

impl HotpathGuard {
    pub fn new(cfg: HotpathConfig, metrics: Metrics) -> Self {
        Self {
            cfg,
            inner: Mutex::new(GuardInner {
                second_window: VecDeque::new(),
                latencies_ms: VecDeque::new(),
                outcomes: VecDeque::new(),
                cache_outcomes: VecDeque::new(),
                consecutive_breaches: 0,
                emergency_until: None,
                recent_violations: VecDeque::new(),
            }),
            metrics,
        }
    }

    /// Gate applied before every live provider call.
    pub fn pre_request_check(
        &self,
        budget_ok: bool,
        provider_failed: bool,
    ) -> Result<(), HotpathBlock> {
        let mut inner = self.inner.lock().expect("hotpath lock poisoned");

        if let Some(until) = inner.emergency_until {
            if Instant::now() < until {
                return Err(HotpathBlock::EmergencyStop);
            }
            inner.emergency_until = None;
            inner.consecutive_breaches = 0;
            warn!("HotpathGuard: Emergency stop expired, resuming live calls");
        }

        if provider_failed {
            return Err(HotpathBlock::ProviderDegraded);
        }
        if !budget_ok {
            return Err(HotpathBlock::BudgetExhausted);
        }

        let second_ago = Instant::now() - Duration::from_secs(1);
        while inner
            .second_window
            .front()
            .is_some_and(|&t| t < second_ago)
        {
            inner.second_window.pop_front();
        }
        if inner.second_window.len() as u32 >= self.cfg.max_live_calls_per_sec {
            return Err(HotpathBlock::RateLimitExceeded);
        }

        inner.second_window.push_back(Instant::now());
        Ok(())
    }

    pub fn record_latency(&self, latency: Duration) {
        let mut inner = self.inner.lock().expect("hotpath lock poisoned");
        if inner.latencies_ms.len() >= LATENCY_RING_CAPACITY {
            inner.latencies_ms.pop_front();
        }
        inner.latencies_ms.push_back(latency.as_secs_f64() * 1_000.0);
    }

    pub fn record_outcome(&self, success: bool) {
        let mut inner = self.inner.lock().expect("hotpath lock poisoned");
        if inner.outcomes.len() >= OUTCOME_RING_CAPACITY {
            inner.outcomes.pop_front();
        }
        inner.outcomes.push_back(success);
    }

    pub fn record_cache_outcome(&self, hit: bool) {
        let mut inner = self.inner.lock().expect("hotpath lock poisoned");
        if inner.cache_outcomes.len() >= OUTCOME_RING_CAPACITY {
            inner.cache_outcomes.pop_front();
        }
        inner.cache_outcomes.push_back(hit);
    }

    fn p95(latencies: &VecDeque<f64>) -> f64 {
        if latencies.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = latencies.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
        sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
    }

    fn rate(ring: &VecDeque<bool>) -> Option<f64> {
        if ring.len() < 10 {
            return None;
        }
        Some(ring.iter().filter(|&&x| x).count() as f64 / ring.len() as f64)
    }

    /// Evaluates the post-request invariants and records violations.
    /// Enough consecutive breaches trigger the emergency stop.
    pub fn post_request_check(&self) {
        let mut inner = self.inner.lock().expect("hotpath lock poisoned");
        let mut violations: Vec<Violation> = Vec::new();

        let p95 = Self::p95(&inner.latencies_ms);
        if !inner.latencies_ms.is_empty() && p95 > self.cfg.max_p95_latency_ms {
            violations.push(Violation {
                invariant: "p95_latency_ms".to_string(),
                severity: Severity::Warning,
                observed: p95,
                threshold: self.cfg.max_p95_latency_ms,
            });
        }

        if let Some(success_rate) = Self::rate(&inner.outcomes) {
            if success_rate < self.cfg.min_success_rate {
                violations.push(Violation {
                    invariant: "success_rate".to_string(),
                    severity: Severity::Critical,
                    observed: success_rate,
                    threshold: self.cfg.min_success_rate,
                });
            }
        }

        if let Some(hit_rate) = Self::rate(&inner.cache_outcomes) {
            if hit_rate < self.cfg.min_cache_hit_rate {
                violations.push(Violation {
                    invariant: "cache_hit_rate".to_string(),
                    severity: Severity::Warning,
                    observed: hit_rate,
                    threshold: self.cfg.min_cache_hit_rate,
                });
            }
        }

        if violations.is_empty() {
            inner.consecutive_breaches = 0;
            return;
        }

        inner.consecutive_breaches += 1;
        for violation in &violations {
            warn!(
                "HotpathGuard: Invariant {} breached: {:.3} vs threshold {:.3} ({})",
                violation.invariant,
                violation.observed,
                violation.threshold,
                violation.severity.label()
            );
            self.metrics
                .hotpath_violations_total
                .with_label_values(&[violation.severity.label()])
                .inc();
            if inner.recent_violations.len() >= 32 {
                inner.recent_violations.pop_front();
            }
            inner.recent_violations.push_back(violation.clone());
        }

        if inner.consecutive_breaches >= self.cfg.max_consecutive_breaches {
            let duration = Duration::from_secs(self.cfg.emergency_stop_duration_min * 60);
            inner.emergency_until = Some(Instant::now() + duration);
            self.metrics
                .hotpath_violations_total
                .with_label_values(&[Severity::Fatal.label()])
                .inc();
            error!(
                "HotpathGuard: EMERGENCY STOP for {} minutes after {} consecutive breaches",
                self.cfg.emergency_stop_duration_min, inner.consecutive_breaches
            );
        }
    }

    pub fn emergency_stopped(&self) -> bool {
        let inner = self.inner.lock().expect("hotpath lock poisoned");
        inner
            .emergency_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Clears an expired emergency stop. Driven by the monitor ticker so
    /// the flag resets even when no requests arrive.
    pub fn tick(&self) {
        let mut inner = self.inner.lock().expect("hotpath lock poisoned");
        if let Some(until) = inner.emergency_until {
            if Instant::now() >= until {
                inner.emergency_until = None;
                inner.consecutive_breaches = 0;
                warn!("HotpathGuard: Emergency stop expired, resuming live calls");
            }
        }
    }

    pub fn consecutive_breaches(&self) -> u32 {
        self.inner
            .lock()
            .expect("hotpath lock poisoned")
            .consecutive_breaches
    }

    pub fn current_p95_ms(&self) -> f64 {
        let inner = self.inner.lock().expect("hotpath lock poisoned");
        Self::p95(&inner.latencies_ms)
    }

    pub fn success_rate(&self) -> Option<f64> {
        let inner = self.inner.lock().expect("hotpath lock poisoned");
        Self::rate(&inner.outcomes)
    }
}
