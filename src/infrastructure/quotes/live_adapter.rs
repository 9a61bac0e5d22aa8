use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::LiveQuotesSection;
use crate::domain::errors::QuoteError;
use crate::domain::ports::QuotesAdapter;
use crate::domain::types::{Quote, Session};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::providers::mock::MockQuotesAdapter;
use crate::infrastructure::quotes::budget::{AdaptiveCadence, CostGovernor};
use crate::infrastructure::quotes::cache::{CacheTier, QuoteCache};
use crate::infrastructure::quotes::health::{HealthState, HealthTracker};
use crate::infrastructure::quotes::hotpath::HotpathGuard;
use crate::infrastructure::quotes::manager::{ExpansionPlan, ProviderManager};
use crate::infrastructure::quotes::promotion::{
    self, PromotionInputs, PromotionReport, PromotionThresholds,
};
use crate::infrastructure::quotes::snapshot::{
    AdapterStateSnapshot, CacheMetricsSnapshot, ConsecutiveStats, SNAPSHOT_VERSION,
};

const FRESHNESS_RING_CAPACITY: usize = 256;

const SHADOW_MAX_SPREAD_DIFF_BPS: f64 = 50.0;
const SHADOW_MAX_MID_DIFF_PCT: f64 = 0.02;

/// Live-quote front door. Composes the provider manager, bounded cache,
/// health hysteresis, cost governor, and hotpath guard; symbols outside
/// the rollout are served by the deterministic mock.
pub struct LiveQuoteAdapter {
    cfg: LiveQuotesSection,
    manager: Arc<ProviderManager>,
    mock: Arc<MockQuotesAdapter>,
    expansion: ExpansionPlan,
    cache: Mutex<QuoteCache>,
    health: Mutex<HealthTracker>,
    governor: Arc<CostGovernor>,
    hotpath: Arc<HotpathGuard>,
    position_symbols: Mutex<HashSet<String>>,
    watchlist: HashSet<String>,
    freshness_ms: Mutex<VecDeque<f64>>,
    metrics: Metrics,
    snapshot_path: PathBuf,
}

impl LiveQuoteAdapter {
    pub fn new(
        cfg: LiveQuotesSection,
        manager: Arc<ProviderManager>,
        mock: Arc<MockQuotesAdapter>,
        expansion: ExpansionPlan,
        governor: Arc<CostGovernor>,
        hotpath: Arc<HotpathGuard>,
        metrics: Metrics,
    ) -> Self {
        let snapshot_path = PathBuf::from(&cfg.snapshot_path);

        // A prior snapshot seeds the health state so a restart does not
        // silently forget a degraded provider.
        let health = match AdapterStateSnapshot::load(&snapshot_path) {
            Some(snapshot) => HealthTracker::restore(cfg.hysteresis.clone(), snapshot.health_state),
            None => HealthTracker::new(cfg.hysteresis.clone()),
        };

        let watchlist: HashSet<String> = cfg.watchlist.iter().cloned().collect();

        Self {
            cache: Mutex::new(QuoteCache::new(cfg.cache_capacity)),
            health: Mutex::new(health),
            position_symbols: Mutex::new(HashSet::new()),
            freshness_ms: Mutex::new(VecDeque::new()),
            watchlist,
            snapshot_path,
            cfg,
            manager,
            mock,
            expansion,
            governor,
            hotpath,
            metrics,
        }
    }

    /// Keeps the positions tier in sync with the portfolio so held
    /// symbols out-prioritize everything else in the cache.
    pub fn set_position_symbols(&self, symbols: HashSet<String>) {
        *self
            .position_symbols
            .lock()
            .expect("positions lock poisoned") = symbols;
    }

    fn tier_for(&self, symbol: &str) -> CacheTier {
        if self
            .position_symbols
            .lock()
            .expect("positions lock poisoned")
            .contains(symbol)
        {
            CacheTier::Positions
        } else if self.watchlist.contains(symbol) {
            CacheTier::Watchlist
        } else {
            CacheTier::Others
        }
    }

    fn is_after_hours(session: Session) -> bool {
        matches!(session, Session::Pre | Session::Post | Session::Closed)
    }

    fn ttl_for(&self, session: Session) -> Duration {
        if Self::is_after_hours(session) {
            Duration::from_millis(self.cfg.ttl_after_hours_ms)
        } else {
            Duration::from_millis(self.cfg.ttl_rth_ms)
        }
    }

    fn stale_ceiling_for(&self, session: Session) -> Duration {
        if Self::is_after_hours(session) {
            Duration::from_millis(self.cfg.stale_ceiling_after_hours_ms)
        } else {
            Duration::from_millis(self.cfg.stale_ceiling_rth_ms)
        }
    }

    fn record_freshness(&self, staleness_ms: f64) {
        let mut ring = self.freshness_ms.lock().expect("freshness lock poisoned");
        if ring.len() >= FRESHNESS_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(staleness_ms);
    }

    pub fn p95_freshness_ms(&self) -> f64 {
        let ring = self.freshness_ms.lock().expect("freshness lock poisoned");
        if ring.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = ring.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
        sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
    }

    pub fn health_state(&self) -> HealthState {
        self.health.lock().expect("health lock poisoned").state()
    }

    fn budget_headroom_low(&self) -> bool {
        1.0 - self.governor.budget_used_pct() < self.cfg.budget_warning_pct
    }

    fn note_mock_path(&self, symbol: &str, reason: &str) {
        debug!(
            "LiveQuoteAdapter: Serving mock for {} ({})",
            symbol, reason
        );
    }

    async fn serve_mock(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let quote = self.mock.get_quote(symbol).await?;
        self.metrics.inc_live_call("mock", "ok");
        self.record_freshness(0.0);
        Ok(quote)
    }

    fn cache_lookup(&self, symbol: &str) -> Option<(Quote, Duration, bool, Session)> {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        let entry = cache.get(symbol)?;
        let age = entry.age();
        let fresh = entry.is_fresh();
        let mut quote = entry.quote.clone();
        quote.staleness_ms = age.as_millis() as u64;
        Some((quote, age, fresh, entry.quote.session))
    }

    fn maybe_spawn_shadow(&self, live: &Quote) {
        if !self.cfg.shadow_enabled || self.cfg.shadow_sample_rate <= 0.0 {
            return;
        }
        if !rand::rng().random_bool(self.cfg.shadow_sample_rate.min(1.0)) {
            return;
        }

        let mock = Arc::clone(&self.mock);
        let metrics = self.metrics.clone();
        let live = live.clone();
        tokio::spawn(async move {
            let Ok(reference) = mock.get_quote(&live.symbol).await else {
                return;
            };
            metrics.shadow_samples_total.inc();

            let spread_diff = (live.spread_bps() - reference.spread_bps()).abs();
            let mid_diff_pct = if reference.mid() > 0.0 {
                ((live.mid() - reference.mid()) / reference.mid()).abs()
            } else {
                0.0
            };

            if spread_diff > SHADOW_MAX_SPREAD_DIFF_BPS || mid_diff_pct > SHADOW_MAX_MID_DIFF_PCT {
                metrics.shadow_mismatches_total.inc();
                warn!(
                    "LiveQuoteAdapter: Shadow mismatch for {}: spread diff {:.1} bps, mid diff {:.2}%",
                    live.symbol,
                    spread_diff,
                    mid_diff_pct * 100.0
                );
            }
        });
    }

    async fn live_fetch(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let started = Instant::now();
        let result = self.manager.get_quote(symbol).await;
        let elapsed = started.elapsed();

        self.hotpath.record_latency(elapsed);

        match result {
            Ok(quote) => {
                self.hotpath.record_outcome(true);
                self.governor.record_request(&quote.source);
                self.metrics.inc_live_call(&quote.source, "ok");
                {
                    let mut health = self.health.lock().expect("health lock poisoned");
                    if let Some(state) = health.record_ok() {
                        self.metrics.live_health_state.set(state.as_gauge());
                    }
                }

                // Budget pressure stretches the effective refresh cadence.
                let cadence = AdaptiveCadence::multiplier(self.governor.budget_used_pct());
                let ttl = self.ttl_for(quote.session).mul_f64(cadence);
                let tier = self.tier_for(symbol);
                self.cache
                    .lock()
                    .expect("cache lock poisoned")
                    .insert(quote.clone(), ttl, tier);

                self.maybe_spawn_shadow(&quote);
                self.record_freshness(quote.staleness_ms as f64);
                self.hotpath.post_request_check();
                Ok(quote)
            }
            Err(e) => {
                self.hotpath.record_outcome(false);
                self.metrics
                    .inc_live_call(self.manager.active_name(), "error");
                {
                    let mut health = self.health.lock().expect("health lock poisoned");
                    if let Some(state) = health.record_breach() {
                        self.metrics.live_health_state.set(state.as_gauge());
                    }
                }
                self.hotpath.post_request_check();
                Err(e)
            }
        }
    }

    /// Periodic state persistence (T5). Failures are logged, never fatal.
    pub fn persist_state(&self) {
        self.metrics
            .budget_used_ratio
            .set(self.governor.budget_used_pct());
        self.metrics
            .live_health_state
            .set(self.health_state().as_gauge());

        let snapshot = self.build_snapshot();
        if let Err(e) = snapshot.save(&self.snapshot_path) {
            warn!("LiveQuoteAdapter: Failed to persist state snapshot: {:#}", e);
        }
    }

    /// Periodic provider probes plus the emergency-stop reset check (T6).
    pub async fn run_health_checks(&self) {
        self.manager.run_health_checks().await;
        self.hotpath.tick();
    }

    pub fn build_snapshot(&self) -> AdapterStateSnapshot {
        let (entries, capacity, hits, misses, evictions) = {
            let cache = self.cache.lock().expect("cache lock poisoned");
            (
                cache.len(),
                cache.capacity(),
                cache.hits(),
                cache.misses(),
                cache.evictions(),
            )
        };

        let mut budget_state = HashMap::new();
        for provider in self.manager.provider_names() {
            budget_state.insert(provider.clone(), self.governor.spend(&provider));
        }

        let (health_state, breaches, oks) = {
            let health = self.health.lock().expect("health lock poisoned");
            (
                health.state(),
                health.consecutive_breaches(),
                health.consecutive_oks(),
            )
        };

        AdapterStateSnapshot {
            version: SNAPSHOT_VERSION,
            last_updated: Utc::now(),
            health_state,
            budget_state,
            cache_metrics: CacheMetricsSnapshot {
                entries,
                capacity,
                hits,
                misses,
                evictions,
            },
            consecutive_stats: ConsecutiveStats { breaches, oks },
        }
    }

    pub fn promotion_report(&self, thresholds: &PromotionThresholds) -> PromotionReport {
        let mut provider_circuits = HashMap::new();
        for provider in self.manager.provider_names() {
            if let Some(state) = self.manager.circuit_state(&provider) {
                provider_circuits.insert(provider, format!("{:?}", state).to_lowercase());
            }
        }

        let cache_hit_rate = self
            .cache
            .lock()
            .expect("cache lock poisoned")
            .hit_rate();

        let shadow_samples = self.metrics.shadow_samples_total.get() as u64;
        let shadow_mismatches = self.metrics.shadow_mismatches_total.get() as u64;

        promotion::evaluate(
            PromotionInputs {
                health_state: self.health_state(),
                provider_circuits,
                success_rate: self.hotpath.success_rate(),
                shadow_samples,
                shadow_mismatches,
                budget_used_pct: self.governor.budget_used_pct(),
                cache_hit_rate,
                p95_freshness_ms: self.p95_freshness_ms(),
            },
            thresholds,
        )
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().expect("cache lock poisoned").len()
    }
}

#[async_trait]
impl QuotesAdapter for LiveQuoteAdapter {
    fn name(&self) -> &str {
        "live"
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        // 1. Rollout gate: non-allowed symbols never touch live data.
        if self.cfg.force_mock || !self.expansion.allows(symbol) {
            self.note_mock_path(symbol, "outside live allowlist");
            return self.serve_mock(symbol).await;
        }

        // 2. Cache.
        if let Some((quote, age, fresh, session)) = self.cache_lookup(symbol) {
            if fresh {
                self.hotpath.record_cache_outcome(true);
                self.record_freshness(quote.staleness_ms as f64);
                return Ok(quote);
            }
            // A slightly-aged entry is still good enough when the budget
            // is nearly gone.
            if age <= Duration::from_millis(self.cfg.max_age_extend_ms)
                && self.budget_headroom_low()
            {
                self.cache
                    .lock()
                    .expect("cache lock poisoned")
                    .extend(symbol, self.ttl_for(session));
                self.hotpath.record_cache_outcome(true);
                self.record_freshness(quote.staleness_ms as f64);
                debug!(
                    "LiveQuoteAdapter: Extended cache for {} under budget pressure",
                    symbol
                );
                return Ok(quote);
            }
        }
        self.hotpath.record_cache_outcome(false);

        // 3. Live call, if permitted.
        let budget_ok = self
            .governor
            .can_make_request(&self.cfg.active_provider)
            .is_ok();
        let health_failed = self.health_state() == HealthState::Failed;

        if self.cfg.enabled {
            match self.hotpath.pre_request_check(budget_ok, health_failed) {
                Ok(()) => match self.live_fetch(symbol).await {
                    Ok(quote) => return Ok(quote),
                    Err(e) => {
                        // 4. Error path: stale cache under ceiling, then mock.
                        if self.cfg.serve_stale_on_error {
                            if let Some((quote, age, _, session)) = self.cache_lookup(symbol) {
                                if age <= self.stale_ceiling_for(session) {
                                    warn!(
                                        "LiveQuoteAdapter: Live fetch failed for {} ({}), serving stale cache ({}ms old)",
                                        symbol, e, quote.staleness_ms
                                    );
                                    self.record_freshness(quote.staleness_ms as f64);
                                    return Ok(quote);
                                }
                            }
                        }
                        if self.cfg.fallback_to_mock {
                            self.note_mock_path(symbol, "live error fallback");
                            return self.serve_mock(symbol).await;
                        }
                        return Err(e);
                    }
                },
                Err(block) => {
                    debug!(
                        "LiveQuoteAdapter: Hotpath blocked live call for {}: {}",
                        symbol, block
                    );
                }
            }
        }

        // Live disabled or blocked: stale-under-ceiling, then mock.
        if let Some((quote, age, _, session)) = self.cache_lookup(symbol) {
            if age <= self.stale_ceiling_for(session) {
                self.record_freshness(quote.staleness_ms as f64);
                return Ok(quote);
            }
        }
        if self.cfg.fallback_to_mock {
            self.note_mock_path(symbol, "live unavailable");
            return self.serve_mock(symbol).await;
        }

        Err(QuoteError::HotpathBlocked(
            "live disabled and no fallback configured".to_string(),
        ))
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError> {
        let mut quotes = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            match self.get_quote(symbol).await {
                Ok(quote) => quotes.push(quote),
                Err(e) => debug!("LiveQuoteAdapter: Dropping {}: {}", symbol, e),
            }
        }
        Ok(quotes)
    }

    async fn health_check(&self) -> Result<(), QuoteError> {
        match self.health_state() {
            HealthState::Failed => Err(QuoteError::ProviderSemantic {
                provider: "live".to_string(),
                reason: "adapter health is failed".to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn close(&self) {
        self.persist_state();
        self.manager.close_all().await;
        info!("LiveQuoteAdapter: Closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExpansionSection;
    use crate::infrastructure::quotes::budget::CostGovernorConfig;
    use crate::infrastructure::quotes::hotpath::HotpathConfig;
    use crate::infrastructure::quotes::manager::ExpansionConfig;
    use std::collections::HashMap;

    fn expansion(allow: &[&str]) -> ExpansionPlan {
        let set: HashSet<String> = allow.iter().map(|s| s.to_string()).collect();
        ExpansionPlan::new(ExpansionConfig {
            canary_duration: Duration::ZERO,
            priority_duration: Duration::ZERO,
            canary_symbols: set.clone(),
            priority_symbols: set.clone(),
            allowlist: set,
        })
    }

    fn adapter(cfg: LiveQuotesSection, allow: &[&str]) -> LiveQuoteAdapter {
        let metrics = Metrics::new().expect("metrics");
        let mut adapters: HashMap<String, Arc<dyn QuotesAdapter>> = HashMap::new();
        // The "live" provider in tests is just another mock with a
        // distinct name so sources can be asserted.
        adapters.insert(
            "mock".to_string(),
            Arc::new(MockQuotesAdapter::new()) as Arc<dyn QuotesAdapter>,
        );
        let manager = Arc::new(ProviderManager::new(
            adapters,
            "mock".to_string(),
            None,
            3,
            Duration::from_secs(30),
        ));
        LiveQuoteAdapter::new(
            cfg,
            manager,
            Arc::new(MockQuotesAdapter::new()),
            expansion(allow),
            Arc::new(CostGovernor::new(CostGovernorConfig::default())),
            Arc::new(HotpathGuard::new(
                HotpathConfig::default(),
                metrics.clone(),
            )),
            metrics,
        )
    }

    fn test_cfg(dir: &std::path::Path) -> LiveQuotesSection {
        LiveQuotesSection {
            enabled: true,
            shadow_enabled: false,
            snapshot_path: dir.join("state.json").display().to_string(),
            active_provider: "mock".to_string(),
            warm_provider: None,
            expansion: ExpansionSection::default(),
            ..LiveQuotesSection::default()
        }
    }

    #[tokio::test]
    async fn test_disallowed_symbol_served_by_mock_without_live_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = adapter(test_cfg(dir.path()), &["AAPL"]);

        let quote = a.get_quote("TSLA").await.expect("quote");
        assert_eq!(quote.source, "mock");
        // Nothing was cached: the mock path bypasses the live cache.
        assert_eq!(a.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_live_disabled_never_counts_live_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = test_cfg(dir.path());
        cfg.enabled = false;
        let a = adapter(cfg, &["AAPL"]);

        for _ in 0..5 {
            let _ = a.get_quote("AAPL").await.expect("quote");
        }
        // The hotpath per-second window only fills on live calls.
        assert_eq!(a.metrics.render().contains("provider=\"live\""), false);
        assert_eq!(a.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_allowed_symbol_fills_cache_and_hits_on_repeat() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = adapter(test_cfg(dir.path()), &["AAPL"]);

        let first = a.get_quote("AAPL").await.expect("quote");
        assert_eq!(a.cache_len(), 1);

        let second = a.get_quote("AAPL").await.expect("quote");
        assert_eq!(first.last, second.last);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_restores_health() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = test_cfg(dir.path());
        let a = adapter(cfg.clone(), &["AAPL"]);

        let _ = a.get_quote("AAPL").await;
        a.persist_state();

        let restored = adapter(cfg, &["AAPL"]);
        assert_eq!(restored.health_state(), HealthState::Healthy);
    }
}
