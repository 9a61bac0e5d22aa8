use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::ProviderConfig;
use crate::domain::errors::QuoteError;
use crate::domain::types::Quote;
use crate::infrastructure::core::rate_limit::{DailyBudget, TokenBucket};

/// Rate, budget, and staleness guardrails shared by the HTTP provider
/// adapters. Each adapter keeps the last good quote per symbol so an
/// exhausted budget can still serve a stale-but-bounded answer.
pub struct ProviderLimits {
    bucket: TokenBucket,
    budget: DailyBudget,
    ttl_ms: u64,
    stale_ceiling_ms: u64,
    last_quotes: Mutex<HashMap<String, (Quote, Instant)>>,
}

/// What the adapter should do for this request.
pub enum FetchPlan {
    /// A cached value is fresh enough; no network call needed.
    Cached(Quote),
    /// Go to the network.
    Fetch,
    /// Limits exhausted but a stale-under-ceiling value exists.
    ServeStale(Quote),
    /// Limits exhausted and nothing serviceable is cached.
    Deny(QuoteError),
}

impl ProviderLimits {
    pub fn new(cfg: &ProviderConfig) -> Self {
        Self {
            bucket: TokenBucket::per_minute(cfg.requests_per_minute),
            budget: DailyBudget::new(cfg.max_requests_per_day),
            ttl_ms: cfg.ttl_ms,
            stale_ceiling_ms: cfg.stale_ceiling_ms,
            last_quotes: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, symbol: &str) -> Option<(Quote, u64)> {
        let cache = self.last_quotes.lock().expect("quote cache lock poisoned");
        cache.get(symbol).map(|(q, at)| {
            let age_ms = at.elapsed().as_millis() as u64;
            let mut quote = q.clone();
            quote.staleness_ms = age_ms;
            (quote, age_ms)
        })
    }

    /// Decides between cache, network, stale fallback, and denial for one
    /// request against `provider`'s limits.
    pub fn plan(&self, provider: &str, symbol: &str) -> FetchPlan {
        if let Some((quote, age_ms)) = self.cached(symbol) {
            if age_ms <= self.ttl_ms {
                return FetchPlan::Cached(quote);
            }
        }

        let rate_ok = self.bucket.try_acquire();
        let budget_ok = rate_ok && self.budget.try_consume();

        if rate_ok && budget_ok {
            return FetchPlan::Fetch;
        }

        if let Some((quote, age_ms)) = self.cached(symbol) {
            if age_ms <= self.stale_ceiling_ms {
                return FetchPlan::ServeStale(quote);
            }
            return FetchPlan::Deny(QuoteError::Stale {
                symbol: symbol.to_string(),
                age_ms,
                ceiling_ms: self.stale_ceiling_ms,
            });
        }

        let err = if rate_ok {
            QuoteError::BudgetExhausted {
                provider: provider.to_string(),
            }
        } else {
            QuoteError::RateLimited {
                provider: provider.to_string(),
            }
        };
        FetchPlan::Deny(err)
    }

    pub fn remember(&self, quote: &Quote) {
        let mut cache = self.last_quotes.lock().expect("quote cache lock poisoned");
        cache.insert(quote.symbol.clone(), (quote.clone(), Instant::now()));
    }

    pub fn budget_remaining(&self) -> u32 {
        self.budget.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::domain::types::Session;

    fn cfg(rpm: u32, per_day: u32) -> ProviderConfig {
        ProviderConfig {
            api_key: String::new(),
            base_url: "http://localhost".to_string(),
            requests_per_minute: rpm,
            max_requests_per_day: per_day,
            timeout_ms: 1_000,
            max_retries: 0,
            ttl_ms: 1_000,
            stale_ceiling_ms: 60_000,
            cost_per_request_usd: 0.0,
            daily_limit_usd: 10.0,
        }
    }

    fn quote(symbol: &str) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            bid: 99.9,
            ask: 100.1,
            last: 100.0,
            volume: 10.0,
            timestamp: Utc::now(),
            session: Session::Rth,
            halted: false,
            source: "test".to_string(),
            staleness_ms: 0,
        }
    }

    #[test]
    fn test_fresh_cache_short_circuits() {
        let limits = ProviderLimits::new(&cfg(10, 10));
        limits.remember(&quote("AAPL"));

        match limits.plan("test", "AAPL") {
            FetchPlan::Cached(q) => assert_eq!(q.symbol, "AAPL"),
            _ => panic!("expected cached plan"),
        }
    }

    #[test]
    fn test_exhausted_budget_serves_stale_under_ceiling() {
        let limits = ProviderLimits::new(&cfg(1000, 1));
        limits.remember(&quote("AAPL"));

        // Consume the single daily request.
        assert!(matches!(limits.plan("test", "MSFT"), FetchPlan::Fetch));
        std::thread::sleep(std::time::Duration::from_millis(1100));

        // TTL elapsed, budget gone, stale ceiling not yet reached.
        match limits.plan("test", "AAPL") {
            FetchPlan::ServeStale(q) => assert!(q.staleness_ms > 1_000),
            _ => panic!("expected stale plan"),
        }
    }

    #[test]
    fn test_exhausted_budget_without_cache_denies() {
        let limits = ProviderLimits::new(&cfg(1000, 0));
        match limits.plan("test", "AAPL") {
            FetchPlan::Deny(QuoteError::BudgetExhausted { .. }) => {}
            _ => panic!("expected budget denial"),
        }
    }
}
