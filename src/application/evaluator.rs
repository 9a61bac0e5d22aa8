use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::application::ingest::IngestTables;
use crate::application::paper::PaperExecutor;
use crate::application::risk_hooks::DrawdownHook;
use crate::config::{DecisionSection, RiskControlsSection};
use crate::domain::decision::{self, DecisionConfig, ProposedAction, Reason, RiskState};
use crate::domain::overrides::OverrideStore;
use crate::domain::ports::{QuotesAdapter, RiskHook};
use crate::domain::types::{EarningsEvent, Features, Session};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::quotes::live_adapter::LiveQuoteAdapter;

/// Per-symbol decision loop (T3). Evaluation for one symbol is always
/// invoked from this single task, so it is serialized; the engine itself
/// stays pure.
pub struct Evaluator {
    universe: Vec<String>,
    decision_cfg: DecisionConfig,
    risk_cfg: RiskControlsSection,
    tables: Arc<RwLock<IngestTables>>,
    quotes: Arc<LiveQuoteAdapter>,
    overrides: Arc<OverrideStore>,
    hooks: Vec<Arc<dyn RiskHook>>,
    drawdown: Arc<DrawdownHook>,
    static_earnings: Vec<EarningsEvent>,
    paper: Arc<PaperExecutor>,
    metrics: Metrics,
}

impl Evaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        universe: Vec<String>,
        decision: &DecisionSection,
        risk_cfg: RiskControlsSection,
        tables: Arc<RwLock<IngestTables>>,
        quotes: Arc<LiveQuoteAdapter>,
        overrides: Arc<OverrideStore>,
        hooks: Vec<Arc<dyn RiskHook>>,
        drawdown: Arc<DrawdownHook>,
        static_earnings: Vec<EarningsEvent>,
        paper: Arc<PaperExecutor>,
        metrics: Metrics,
    ) -> Self {
        Self {
            universe,
            decision_cfg: DecisionConfig {
                positive: decision.positive,
                very_positive: decision.very_positive,
                base_usd: decision.base_usd,
                corroboration: decision.corroboration.clone(),
                earnings_embargo: decision.earnings_embargo.clone(),
            },
            risk_cfg,
            tables,
            quotes,
            overrides,
            hooks,
            drawdown,
            static_earnings,
            paper,
            metrics,
        }
    }

    /// Feature snapshot: the wire tick is the base, refreshed by the
    /// live-quote adapter for price, spread, and halt state.
    async fn refresh_features(&self, symbol: &str) -> Features {
        let base = {
            let tables = self.tables.read().expect("tables lock poisoned");
            tables.features_for(symbol)
        };

        let quote = self.quotes.get_quote(symbol).await.ok();

        match (base, quote) {
            (Some(mut features), Some(quote)) => {
                features.last = quote.last;
                features.spread_bps = quote.spread_bps();
                features.halted = features.halted || quote.halted;
                features
            }
            (Some(features), None) => features,
            (None, Some(quote)) => Features {
                symbol: symbol.to_string(),
                halted: quote.halted,
                last: quote.last,
                vwap_5m: quote.last,
                rel_volume: 1.0,
                premarket: quote.session == Session::Pre,
                postmarket: quote.session == Session::Post,
                spread_bps: quote.spread_bps(),
            },
            (None, None) => {
                debug!("Evaluator: No features available for {}", symbol);
                Features {
                    symbol: symbol.to_string(),
                    halted: false,
                    last: 0.0,
                    vwap_5m: 0.0,
                    rel_volume: 0.0,
                    premarket: false,
                    postmarket: false,
                    spread_bps: 0.0,
                }
            }
        }
    }

    fn risk_state(&self) -> RiskState {
        let now = Utc::now();
        let overrides = self.overrides.current();
        RiskState {
            global_pause: self.risk_cfg.global_pause
                || overrides.global_pause.unwrap_or(false),
            block_premarket: self.risk_cfg.block_premarket,
            block_postmarket: self.risk_cfg.block_postmarket,
            max_spread_bps: self.risk_cfg.max_spread_bps,
            frozen_symbols: overrides.active_frozen(now),
        }
    }

    /// Evaluates one symbol and records the decision counters.
    pub async fn evaluate_symbol(&self, symbol: &str) -> (ProposedAction, Features) {
        let features = self.refresh_features(symbol).await;
        let now = Utc::now();

        let (advice, mut earnings) = {
            let tables = self.tables.read().expect("tables lock poisoned");
            (tables.advice_for(symbol, now), tables.earnings())
        };
        earnings.extend(self.static_earnings.iter().cloned());

        let risk = self.risk_state();
        let started = Instant::now();
        let action = decision::evaluate(
            symbol,
            &advice,
            &features,
            &risk,
            &self.decision_cfg,
            &earnings,
            &self.hooks,
            now,
        );
        self.metrics
            .decision_latency_seconds
            .observe(started.elapsed().as_secs_f64());
        self.metrics
            .inc_decision(symbol, &action.intent.to_string());
        if let Ok(reason) = serde_json::from_str::<Reason>(&action.reason_json) {
            for gate in &reason.gates_blocked {
                self.metrics.inc_gate_block(gate, symbol);
            }
        }

        (action, features)
    }

    /// One pass over the universe. Prints the per-symbol line in oneshot
    /// mode and forwards accepted intents to the paper executor.
    pub async fn evaluate_all(&self, print_lines: bool) -> Vec<ProposedAction> {
        self.sync_portfolio_state();

        let mut actions = Vec::with_capacity(self.universe.len());
        for symbol in &self.universe {
            let (action, features) = self.evaluate_symbol(symbol).await;

            if print_lines {
                println!("{} -> {}", symbol, action.intent);
            }
            info!(
                "Evaluator: {} -> {} (score {:.4}, notional {:.0})",
                symbol, action.intent, action.fused_score, action.scaled_notional
            );

            if let Err(e) = self.paper.process(&action, features.last) {
                // Outbox failures affect this symbol only; evaluation of
                // the rest of the universe continues.
                warn!("Evaluator: Outbox write failed for {}: {}", symbol, e);
            }
            actions.push(action);
        }
        actions
    }

    /// Periodic loop for non-oneshot mode.
    pub async fn run_periodic(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            "Evaluator: Periodic evaluation every {:?} across {} symbols",
            interval,
            self.universe.len()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate_all(false).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Evaluator: Shutdown requested, stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Feeds portfolio-derived state to the cache tiers and the drawdown
    /// hook before each evaluation pass.
    fn sync_portfolio_state(&self) {
        let portfolio = self.paper.portfolio();
        let portfolio = portfolio.read().expect("portfolio lock poisoned");

        let held: HashSet<String> = portfolio
            .positions
            .values()
            .filter(|p| p.qty > 0.0)
            .map(|p| p.symbol.clone())
            .collect();
        self.quotes.set_position_symbols(held);

        let prices: HashMap<String, f64> = {
            let tables = self.tables.read().expect("tables lock poisoned");
            self.universe
                .iter()
                .filter_map(|s| tables.features_for(s).map(|f| (s.clone(), f.last)))
                .collect()
        };
        self.drawdown.observe_equity(portfolio.gross_exposure(&prices));
    }
}
