use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Aggregate health of the live-quote path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Failed,
}

impl HealthState {
    pub fn as_gauge(&self) -> f64 {
        match self {
            HealthState::Healthy => 0.0,
            HealthState::Degraded => 1.0,
            HealthState::Failed => 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisConfig {
    /// Breaches to move healthy -> degraded.
    pub consecutive_breach_to_degrade: u32,
    /// Breaches to move degraded -> failed.
    pub max_consecutive_errors: u32,
    /// Successes required per recovery step.
    pub consecutive_ok_to_recover: u32,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            consecutive_breach_to_degrade: 3,
            max_consecutive_errors: 8,
            consecutive_ok_to_recover: 5,
        }
    }
}

/// Health tracker with hysteresis: repeated evidence is required in both
/// directions so a single flap never changes state. Recovery is gradual,
/// one step per run of consecutive successes.
pub struct HealthTracker {
    cfg: HysteresisConfig,
    state: HealthState,
    consecutive_breaches: u32,
    consecutive_oks: u32,
}

impl HealthTracker {
    pub fn new(cfg: HysteresisConfig) -> Self {
        Self {
            cfg,
            state: HealthState::Healthy,
            consecutive_breaches: 0,
            consecutive_oks: 0,
        }
    }

    /// Restores a persisted state without replaying its history.
    pub fn restore(cfg: HysteresisConfig, state: HealthState) -> Self {
        Self {
            cfg,
            state,
            consecutive_breaches: 0,
            consecutive_oks: 0,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn consecutive_breaches(&self) -> u32 {
        self.consecutive_breaches
    }

    pub fn consecutive_oks(&self) -> u32 {
        self.consecutive_oks
    }

    /// Records a breach. Returns the new state when a transition fires.
    /// The breach counter keeps accumulating across the degrade
    /// transition; only a success resets it.
    pub fn record_breach(&mut self) -> Option<HealthState> {
        self.consecutive_oks = 0;
        self.consecutive_breaches += 1;

        let next = match self.state {
            HealthState::Healthy
                if self.consecutive_breaches >= self.cfg.consecutive_breach_to_degrade =>
            {
                Some(HealthState::Degraded)
            }
            HealthState::Degraded
                if self.consecutive_breaches >= self.cfg.max_consecutive_errors =>
            {
                Some(HealthState::Failed)
            }
            _ => None,
        };

        if let Some(state) = next {
            warn!(
                "HealthTracker: {:?} -> {:?} after {} consecutive breaches",
                self.state, state, self.consecutive_breaches
            );
            self.state = state;
        }
        next
    }

    /// Records a success. Returns the new state when a recovery step fires.
    pub fn record_ok(&mut self) -> Option<HealthState> {
        self.consecutive_breaches = 0;
        self.consecutive_oks += 1;

        if self.consecutive_oks < self.cfg.consecutive_ok_to_recover {
            return None;
        }

        let next = match self.state {
            HealthState::Failed => Some(HealthState::Degraded),
            HealthState::Degraded => Some(HealthState::Healthy),
            HealthState::Healthy => None,
        };

        if let Some(state) = next {
            info!(
                "HealthTracker: {:?} -> {:?} after {} consecutive successes",
                self.state, state, self.consecutive_oks
            );
            self.state = state;
            self.consecutive_oks = 0;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> HysteresisConfig {
        HysteresisConfig {
            consecutive_breach_to_degrade: 2,
            max_consecutive_errors: 3,
            consecutive_ok_to_recover: 2,
        }
    }

    #[test]
    fn test_degrades_after_consecutive_breaches() {
        let mut tracker = HealthTracker::new(cfg());
        assert!(tracker.record_breach().is_none());
        assert_eq!(tracker.record_breach(), Some(HealthState::Degraded));
        assert_eq!(tracker.state(), HealthState::Degraded);
    }

    #[test]
    fn test_single_success_resets_breach_run() {
        let mut tracker = HealthTracker::new(cfg());
        tracker.record_breach();
        tracker.record_ok();
        assert!(tracker.record_breach().is_none());
        assert_eq!(tracker.state(), HealthState::Healthy);
    }

    #[test]
    fn test_breach_run_accumulates_through_degrade_to_failed() {
        let mut tracker = HealthTracker::new(cfg());
        assert!(tracker.record_breach().is_none());
        assert_eq!(tracker.record_breach(), Some(HealthState::Degraded));
        // The same run keeps counting: failed at max_consecutive_errors,
        // not max_consecutive_errors after the degrade.
        assert_eq!(tracker.record_breach(), Some(HealthState::Failed));
        assert_eq!(tracker.consecutive_breaches(), 3);
    }

    #[test]
    fn test_success_between_runs_restarts_the_count() {
        let mut tracker = HealthTracker::new(cfg());
        tracker.record_breach();
        tracker.record_breach(); // degraded at 2
        tracker.record_ok();

        // A fresh run must reach max_consecutive_errors on its own.
        assert!(tracker.record_breach().is_none());
        assert!(tracker.record_breach().is_none());
        assert_eq!(tracker.record_breach(), Some(HealthState::Failed));
    }

    #[test]
    fn test_recovery_is_stepwise() {
        let mut tracker = HealthTracker::restore(cfg(), HealthState::Failed);

        tracker.record_ok();
        assert_eq!(tracker.record_ok(), Some(HealthState::Degraded));
        assert_eq!(tracker.state(), HealthState::Degraded);

        tracker.record_ok();
        assert_eq!(tracker.record_ok(), Some(HealthState::Healthy));
        assert_eq!(tracker.state(), HealthState::Healthy);
    }

    #[test]
    fn test_breach_during_recovery_resets_progress() {
        let mut tracker = HealthTracker::restore(cfg(), HealthState::Failed);
        tracker.record_ok();
        tracker.record_breach();
        tracker.record_ok();
        assert!(tracker.state() == HealthState::Failed);
        assert_eq!(tracker.record_ok(), Some(HealthState::Degraded));
    }
}
