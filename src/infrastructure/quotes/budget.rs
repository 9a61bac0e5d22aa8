use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::infrastructure::quotes::cache::CacheTier;

/// Per-provider spend limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderBudgetConfig {
    pub cost_per_request_usd: f64,
    pub daily_limit_usd: f64,
    pub max_requests_per_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostGovernorConfig {
    pub providers: HashMap<String, ProviderBudgetConfig>,
    pub global_daily_limit_usd: f64,
    /// Fraction of the global budget at which a warning is logged.
    pub warning_threshold: f64,
}

impl Default for CostGovernorConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            global_daily_limit_usd: 25.0,
            warning_threshold: 0.8,
        }
    }
}

/// Reasons `can_make_request` says no.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetDenial {
    ProviderRate,
    ProviderDailyCap,
    GlobalDailyCap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSpend {
    pub requests_today: u64,
    pub estimated_cost_usd: f64,
}

struct ProviderState {
    spend: ProviderSpend,
    minute_window: VecDeque<Instant>,
    last_warning: Option<Instant>,
}

struct GovernorInner {
    providers: HashMap<String, ProviderState>,
    day: NaiveDate,
}

/// Tracks per-provider and global daily spend and enforces the caps.
pub struct CostGovernor {
    cfg: CostGovernorConfig,
    inner: Mutex<GovernorInner>,
}

impl CostGovernor {
    pub fn new(cfg: CostGovernorConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(GovernorInner {
                providers: HashMap::new(),
                day: Utc::now().date_naive(),
            }),
        }
    }

    fn roll_day(inner: &mut GovernorInner) {
        let today = Utc::now().date_naive();
        if inner.day != today {
            inner.day = today;
            for state in inner.providers.values_mut() {
                state.spend = ProviderSpend::default();
                state.minute_window.clear();
            }
        }
    }

    fn provider_cfg(&self, provider: &str) -> ProviderBudgetConfig {
        self.cfg
            .providers
            .get(provider)
            .cloned()
            .unwrap_or(ProviderBudgetConfig {
                cost_per_request_usd: 0.0,
                daily_limit_usd: f64::INFINITY,
                max_requests_per_minute: u32::MAX,
            })
    }

    pub fn can_make_request(&self, provider: &str) -> Result<(), BudgetDenial> {
        let pcfg = self.provider_cfg(provider);
        let mut inner = self.inner.lock().expect("governor lock poisoned");
        Self::roll_day(&mut inner);

        let global_spend: f64 = inner
            .providers
            .values()
            .map(|s| s.spend.estimated_cost_usd)
            .sum();
        if global_spend + pcfg.cost_per_request_usd > self.cfg.global_daily_limit_usd {
            return Err(BudgetDenial::GlobalDailyCap);
        }

        let state = inner.providers.entry(provider.to_string()).or_insert_with(|| {
            ProviderState {
                spend: ProviderSpend::default(),
                minute_window: VecDeque::new(),
                last_warning: None,
            }
        });

        let minute_ago = Instant::now() - Duration::from_secs(60);
        while state
            .minute_window
            .front()
            .is_some_and(|&t| t < minute_ago)
        {
            state.minute_window.pop_front();
        }

        if state.minute_window.len() as u32 >= pcfg.max_requests_per_minute {
            return Err(BudgetDenial::ProviderRate);
        }
        if state.spend.estimated_cost_usd + pcfg.cost_per_request_usd > pcfg.daily_limit_usd {
            return Err(BudgetDenial::ProviderDailyCap);
        }
        Ok(())
    }

    pub fn record_request(&self, provider: &str) {
        let pcfg = self.provider_cfg(provider);
        let mut inner = self.inner.lock().expect("governor lock poisoned");
        Self::roll_day(&mut inner);

        let state = inner.providers.entry(provider.to_string()).or_insert_with(|| {
            ProviderState {
                spend: ProviderSpend::default(),
                minute_window: VecDeque::new(),
                last_warning: None,
            }
        });

        state.spend.requests_today += 1;
        state.spend.estimated_cost_usd += pcfg.cost_per_request_usd;
        state.minute_window.push_back(Instant::now());

        // Warn at most once per hour per provider once the projection
        // crosses the threshold.
        let projected: f64 = inner
            .providers
            .values()
            .map(|s| s.spend.estimated_cost_usd)
            .sum();
        if projected >= self.cfg.warning_threshold * self.cfg.global_daily_limit_usd {
            let state = inner
                .providers
                .get_mut(provider)
                .expect("provider state just inserted");
            let warn_due = state
                .last_warning
                .map(|t| t.elapsed() >= Duration::from_secs(3600))
                .unwrap_or(true);
            if warn_due {
                state.last_warning = Some(Instant::now());
                warn!(
                    "CostGovernor: Projected daily spend ${:.2} is at {:.0}% of the ${:.2} global cap",
                    projected,
                    projected / self.cfg.global_daily_limit_usd * 100.0,
                    self.cfg.global_daily_limit_usd
                );
            }
        }
    }

    pub fn spend(&self, provider: &str) -> ProviderSpend {
        let inner = self.inner.lock().expect("governor lock poisoned");
        inner
            .providers
            .get(provider)
            .map(|s| s.spend.clone())
            .unwrap_or_default()
    }

    /// Fraction of the global daily budget consumed, in [0, 1].
    pub fn budget_used_pct(&self) -> f64 {
        if self.cfg.global_daily_limit_usd <= 0.0 {
            return 0.0;
        }
        let inner = self.inner.lock().expect("governor lock poisoned");
        let spent: f64 = inner
            .providers
            .values()
            .map(|s| s.spend.estimated_cost_usd)
            .sum();
        (spent / self.cfg.global_daily_limit_usd).min(1.0)
    }
}

/// Maps budget pressure onto refresh-cadence multipliers so tiers slow
/// down before the budget runs dry.
pub struct AdaptiveCadence;

impl AdaptiveCadence {
    pub fn multiplier(budget_used_pct: f64) -> f64 {
        if budget_used_pct >= 0.9 {
            3.0
        } else if budget_used_pct >= 0.8 {
            2.0
        } else if budget_used_pct >= 0.7 {
            1.5
        } else {
            1.0
        }
    }

    pub fn refresh_interval(tier: CacheTier, base: Duration, budget_used_pct: f64) -> Duration {
        let tier_factor = match tier {
            CacheTier::Positions => 1.0,
            CacheTier::Watchlist => 2.0,
            CacheTier::Others => 4.0,
        };
        base.mul_f64(tier_factor * Self::multiplier(budget_used_pct))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(per_request: f64, provider_cap: f64, global_cap: f64) -> CostGovernor {
        let mut providers = HashMap::new();
        providers.insert(
            "polygon".to_string(),
            ProviderBudgetConfig {
                cost_per_request_usd: per_request,
                daily_limit_usd: provider_cap,
                max_requests_per_minute: 100,
            },
        );
        CostGovernor::new(CostGovernorConfig {
            providers,
            global_daily_limit_usd: global_cap,
            warning_threshold: 0.8,
        })
    }

    #[test]
    fn test_provider_daily_cap() {
        let gov = governor(1.0, 2.0, 100.0);

        assert!(gov.can_make_request("polygon").is_ok());
        gov.record_request("polygon");
        gov.record_request("polygon");

        assert_eq!(
            gov.can_make_request("polygon"),
            Err(BudgetDenial::ProviderDailyCap)
        );
    }

    #[test]
    fn test_global_daily_cap() {
        let gov = governor(1.0, 100.0, 2.0);
        gov.record_request("polygon");
        gov.record_request("polygon");

        assert_eq!(
            gov.can_make_request("polygon"),
            Err(BudgetDenial::GlobalDailyCap)
        );
    }

    #[test]
    fn test_minute_rate_cap() {
        let mut providers = HashMap::new();
        providers.insert(
            "polygon".to_string(),
            ProviderBudgetConfig {
                cost_per_request_usd: 0.0,
                daily_limit_usd: 100.0,
                max_requests_per_minute: 2,
            },
        );
        let gov = CostGovernor::new(CostGovernorConfig {
            providers,
            global_daily_limit_usd: 100.0,
            warning_threshold: 0.8,
        });

        gov.record_request("polygon");
        gov.record_request("polygon");
        assert_eq!(
            gov.can_make_request("polygon"),
            Err(BudgetDenial::ProviderRate)
        );
    }

    #[test]
    fn test_budget_used_pct() {
        let gov = governor(1.0, 100.0, 10.0);
        for _ in 0..5 {
            gov.record_request("polygon");
        }
        assert!((gov.budget_used_pct() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_cadence_multipliers() {
        assert_eq!(AdaptiveCadence::multiplier(0.5), 1.0);
        assert_eq!(AdaptiveCadence::multiplier(0.7), 1.5);
        assert_eq!(AdaptiveCadence::multiplier(0.85), 2.0);
        assert_eq!(AdaptiveCadence::multiplier(0.95), 3.0);
    }

    #[test]
    fn test_refresh_interval_combines_tier_and_budget() {
        let base = Duration::from_secs(10);
        assert_eq!(
            AdaptiveCadence::refresh_interval(CacheTier::Positions, base, 0.0),
            Duration::from_secs(10)
        );
        assert_eq!(
            AdaptiveCadence::refresh_interval(CacheTier::Others, base, 0.9),
            Duration::from_secs(120)
        );
    }
}
