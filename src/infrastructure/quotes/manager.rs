use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::domain::errors::QuoteError;
use crate::domain::ports::QuotesAdapter;
use crate::domain::symbols::SymbolNormalizer;
use crate::domain::types::Quote;
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitState};

/// Staged rollout state. Monotone and time-driven: canary first, then the
/// priority set, then the full allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpansionState {
    Canary,
    Priority,
    Full,
}

#[derive(Debug, Clone)]
pub struct ExpansionConfig {
    pub canary_duration: Duration,
    pub priority_duration: Duration,
    pub canary_symbols: HashSet<String>,
    pub priority_symbols: HashSet<String>,
    pub allowlist: HashSet<String>,
}

/// Tracks which symbols are currently entitled to live data.
pub struct ExpansionPlan {
    cfg: ExpansionConfig,
    started_at: Instant,
}

impl ExpansionPlan {
    pub fn new(cfg: ExpansionConfig) -> Self {
        Self {
            cfg,
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> ExpansionState {
        let elapsed = self.started_at.elapsed();
        if elapsed >= self.cfg.canary_duration + self.cfg.priority_duration {
            ExpansionState::Full
        } else if elapsed >= self.cfg.canary_duration {
            ExpansionState::Priority
        } else {
            ExpansionState::Canary
        }
    }

    /// Whether live data is allowed for the symbol right now. Symbols
    /// outside the active stage are served by the mock adapter.
    pub fn allows(&self, symbol: &str) -> bool {
        match self.state() {
            ExpansionState::Canary => self.cfg.canary_symbols.contains(symbol),
            ExpansionState::Priority => self.cfg.priority_symbols.contains(symbol),
            ExpansionState::Full => self.cfg.allowlist.contains(symbol),
        }
    }
}

/// Selects among a set of named adapters: the active provider when its
/// breaker admits requests, the warm standby otherwise, with a single
/// failover retry inside one request.
pub struct ProviderManager {
    adapters: HashMap<String, Arc<dyn QuotesAdapter>>,
    breakers: HashMap<String, CircuitBreaker>,
    normalizer: Arc<SymbolNormalizer>,
    active: String,
    warm: Option<String>,
}

impl ProviderManager {
    pub fn new(
        adapters: HashMap<String, Arc<dyn QuotesAdapter>>,
        active: String,
        warm: Option<String>,
        breaker_failure_threshold: u32,
        breaker_cooldown: Duration,
    ) -> Self {
        let breakers = adapters
            .keys()
            .map(|name| {
                (
                    name.clone(),
                    CircuitBreaker::new(name.clone(), breaker_failure_threshold, breaker_cooldown),
                )
            })
            .collect();

        Self {
            adapters,
            breakers,
            normalizer: Arc::new(SymbolNormalizer::default()),
            active,
            warm,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<SymbolNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn active_name(&self) -> &str {
        &self.active
    }

    pub fn circuit_state(&self, provider: &str) -> Option<CircuitState> {
        self.breakers.get(provider).map(|b| b.state())
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn QuotesAdapter>> {
        self.adapters.get(name).cloned()
    }

    fn try_order(&self) -> Vec<String> {
        let mut order = vec![self.active.clone()];
        if let Some(warm) = &self.warm {
            if warm != &self.active {
                order.push(warm.clone());
            }
        }
        order
    }

    /// Fetches a quote through the active provider, failing over to the
    /// warm provider once for the same request when the active call
    /// faults or its breaker is open.
    ///
    /// The symbol goes through the normalizer first: renames substitute
    /// the successor symbol, delisted or acquired symbols are rejected,
    /// and split ratios scale the quoted prices.
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let resolution = self.normalizer.resolve(symbol, chrono::Utc::now())?;
        let mut last_err: Option<QuoteError> = None;

        for name in self.try_order() {
            let Some(adapter) = self.adapters.get(&name) else {
                continue;
            };
            let Some(breaker) = self.breakers.get(&name) else {
                continue;
            };

            if !breaker.allow_request() {
                last_err = Some(QuoteError::CircuitOpen {
                    provider: name.clone(),
                });
                continue;
            }

            let provider_symbol = self.normalizer.denormalize(&name, &resolution.symbol);
            match adapter.get_quote(&provider_symbol).await {
                Ok(mut quote) => {
                    breaker.record_success();
                    quote.symbol = resolution.symbol.clone();
                    if resolution.price_multiplier != 1.0 {
                        quote.bid *= resolution.price_multiplier;
                        quote.ask *= resolution.price_multiplier;
                        quote.last *= resolution.price_multiplier;
                    }
                    return Ok(quote);
                }
                Err(e) => {
                    if e.is_provider_fault() {
                        breaker.record_failure();
                        warn!(
                            "ProviderManager: {} failed for {} ({}), trying next provider",
                            name, symbol, e
                        );
                        last_err = Some(e);
                        continue;
                    }
                    // Validation and symbol errors are final; failover
                    // would just repeat them.
                    return Err(e);
                }
            }
        }

        Err(last_err.unwrap_or(QuoteError::CircuitOpen {
            provider: self.active.clone(),
        }))
    }

    /// Probes each provider's health endpoint and feeds the breakers.
    pub async fn run_health_checks(&self) {
        for (name, adapter) in &self.adapters {
            let Some(breaker) = self.breakers.get(name) else {
                continue;
            };
            if !breaker.allow_request() {
                continue;
            }
            match adapter.health_check().await {
                Ok(()) => breaker.record_success(),
                Err(e) => {
                    warn!("ProviderManager: Health check failed for {}: {}", name, e);
                    breaker.record_failure();
                }
            }
        }
    }

    pub async fn close_all(&self) {
        for (name, adapter) in &self.adapters {
            info!("ProviderManager: Closing adapter {}", name);
            adapter.close().await;
        }
    }
}
