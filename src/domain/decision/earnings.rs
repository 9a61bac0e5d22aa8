use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::{EarningsEvent, EarningsStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbargoConfig {
    pub minutes_before: i64,
    pub minutes_after: i64,
    pub block_on_estimated: bool,
}

impl Default for EmbargoConfig {
    fn default() -> Self {
        Self {
            minutes_before: 15,
            minutes_after: 60,
            block_on_estimated: false,
        }
    }
}

/// Embargo status included in the decision reason. `window_end` is the
/// moment the embargo lifts (`end_utc + minutes_after`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EarningsEmbargoState {
    pub active: bool,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

/// Checks whether `now` falls inside any embargo window for the symbol.
/// Estimated events are skipped unless the config blocks on them.
pub fn analyze(
    symbol: &str,
    events: &[EarningsEvent],
    cfg: &EmbargoConfig,
    now: DateTime<Utc>,
) -> EarningsEmbargoState {
    for event in events {
        if !event.symbol.eq_ignore_ascii_case(symbol) {
            continue;
        }
        if event.status == EarningsStatus::Estimated && !cfg.block_on_estimated {
            continue;
        }

        let window_start = event.start_utc - Duration::minutes(cfg.minutes_before);
        let window_end = event.end_utc + Duration::minutes(cfg.minutes_after);
        if now >= window_start && now <= window_end {
            return EarningsEmbargoState {
                active: true,
                window_start: Some(window_start),
                window_end: Some(window_end),
            };
        }
    }

    EarningsEmbargoState::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(symbol: &str, start: DateTime<Utc>, status: EarningsStatus) -> EarningsEvent {
        EarningsEvent {
            symbol: symbol.to_string(),
            start_utc: start,
            end_utc: start + Duration::hours(1),
            status,
        }
    }

    #[test]
    fn test_inside_pre_window_is_embargoed() {
        let now = Utc::now();
        let events = vec![event(
            "AAPL",
            now + Duration::minutes(10),
            EarningsStatus::Confirmed,
        )];
        let cfg = EmbargoConfig::default();

        let state = analyze("AAPL", &events, &cfg, now);
        assert!(state.active);
        assert_eq!(
            state.window_end,
            Some(now + Duration::minutes(10) + Duration::hours(1) + Duration::minutes(60))
        );
    }

    #[test]
    fn test_outside_window_is_clear() {
        let now = Utc::now();
        let events = vec![event(
            "AAPL",
            now + Duration::hours(5),
            EarningsStatus::Confirmed,
        )];
        let cfg = EmbargoConfig::default();

        assert!(!analyze("AAPL", &events, &cfg, now).active);
    }

    #[test]
    fn test_estimated_skipped_by_default() {
        let now = Utc::now();
        let events = vec![event(
            "AAPL",
            now + Duration::minutes(10),
            EarningsStatus::Estimated,
        )];
        let cfg = EmbargoConfig::default();

        assert!(!analyze("AAPL", &events, &cfg, now).active);
    }

    #[test]
    fn test_estimated_blocked_when_configured() {
        let now = Utc::now();
        let events = vec![event(
            "AAPL",
            now + Duration::minutes(10),
            EarningsStatus::Estimated,
        )];
        let cfg = EmbargoConfig {
            block_on_estimated: true,
            ..EmbargoConfig::default()
        };

        assert!(analyze("AAPL", &events, &cfg, now).active);
    }

    #[test]
    fn test_other_symbols_do_not_match() {
        let now = Utc::now();
        let events = vec![event(
            "MSFT",
            now + Duration::minutes(10),
            EarningsStatus::Confirmed,
        )];
        let cfg = EmbargoConfig::default();

        assert!(!analyze("AAPL", &events, &cfg, now).active);
    }
}
