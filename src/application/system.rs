use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::application::evaluator::Evaluator;
use crate::application::ingest::{IngestConsumer, IngestTables};
use crate::application::paper::PaperExecutor;
use crate::application::risk_hooks::{self, DrawdownHook};
use crate::config::Config;
use crate::domain::overrides::{OverrideStore, RuntimeOverrides};
use crate::domain::ports::{EventTransport, QuotesAdapter};
use crate::domain::symbols::SymbolNormalizer;
use crate::domain::trading::portfolio::Portfolio;
use crate::domain::types::EarningsEvent;
use crate::domain::wire::EarningsPayload;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::outbox::Outbox;
use crate::infrastructure::providers;
use crate::infrastructure::providers::mock::MockQuotesAdapter;
use crate::infrastructure::quotes::budget::{
    CostGovernor, CostGovernorConfig, ProviderBudgetConfig,
};
use crate::infrastructure::quotes::hotpath::HotpathGuard;
use crate::infrastructure::quotes::live_adapter::LiveQuoteAdapter;
use crate::infrastructure::quotes::manager::{ExpansionConfig, ExpansionPlan, ProviderManager};
use crate::infrastructure::quotes::promotion::PromotionThresholds;
use crate::infrastructure::simulation::latency_model::UniformLatency;
use crate::infrastructure::simulation::slippage_model::UniformSlippage;
use crate::infrastructure::transport::poll::PollTransport;
use crate::infrastructure::transport::sse::SseTransport;

/// Wires the whole system together and owns the long-running tasks.
pub struct Application {
    config: Config,
    metrics: Metrics,
    tables: Arc<RwLock<IngestTables>>,
    overrides: Arc<OverrideStore>,
    live: Arc<LiveQuoteAdapter>,
    paper: Arc<PaperExecutor>,
    evaluator: Arc<Evaluator>,
    shutdown_tx: watch::Sender<bool>,
}

/// Loads the earnings calendar file: a JSON array in the wire payload
/// shape. Malformed entries are skipped with a warning.
pub fn load_earnings(path: &Path) -> Result<Vec<EarningsEvent>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read earnings file {}", path.display()))?;
    let values: Vec<serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse earnings file {}", path.display()))?;

    let mut events = Vec::with_capacity(values.len());
    for value in values {
        match serde_json::from_value::<EarningsPayload>(value) {
            Ok(payload) => events.push(payload.into_event()),
            Err(e) => warn!("Application: Skipping malformed earnings entry: {}", e),
        }
    }
    info!(
        "Application: Loaded {} earnings events from {}",
        events.len(),
        path.display()
    );
    Ok(events)
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let metrics = Metrics::new().context("Failed to create metrics registry")?;
        let (shutdown_tx, _) = watch::channel(false);

        // Quote side: adapters -> manager -> live adapter.
        let mut adapters: HashMap<String, Arc<dyn QuotesAdapter>> = HashMap::new();
        adapters.insert(
            "alpha_vantage".to_string(),
            providers::build_adapter("alpha_vantage", &config.providers.alpha_vantage),
        );
        adapters.insert(
            "polygon".to_string(),
            providers::build_adapter("polygon", &config.providers.polygon),
        );
        adapters.insert("mock".to_string(), Arc::new(MockQuotesAdapter::new()));

        if !adapters.contains_key(&config.live_quotes.active_provider) {
            anyhow::bail!(
                "Unknown active provider '{}'",
                config.live_quotes.active_provider
            );
        }

        let mut normalizer = SymbolNormalizer::new();
        for mapping in &config.symbol_map.mappings {
            normalizer.add_mapping(
                &mapping.provider,
                &mapping.provider_symbol,
                &mapping.canonical,
            );
        }
        for (symbol, action) in &config.symbol_map.corporate_actions {
            normalizer.set_action(symbol, action.clone());
        }

        let manager = Arc::new(
            ProviderManager::new(
                adapters,
                config.live_quotes.active_provider.clone(),
                config.live_quotes.warm_provider.clone(),
                config.live_quotes.breaker_failure_threshold,
                Duration::from_secs(config.live_quotes.breaker_cooldown_secs),
            )
            .with_normalizer(Arc::new(normalizer)),
        );

        let mut governor_providers = HashMap::new();
        for (name, provider) in [
            ("alpha_vantage", &config.providers.alpha_vantage),
            ("polygon", &config.providers.polygon),
        ] {
            governor_providers.insert(
                name.to_string(),
                ProviderBudgetConfig {
                    cost_per_request_usd: provider.cost_per_request_usd,
                    daily_limit_usd: provider.daily_limit_usd,
                    max_requests_per_minute: provider.requests_per_minute,
                },
            );
        }
        let governor = Arc::new(CostGovernor::new(CostGovernorConfig {
            providers: governor_providers,
            global_daily_limit_usd: config.budget.global_daily_limit_usd,
            warning_threshold: config.budget.warning_threshold,
        }));

        let hotpath = Arc::new(HotpathGuard::new(
            config.live_quotes.hotpath.clone(),
            metrics.clone(),
        ));

        let expansion = ExpansionPlan::new(ExpansionConfig {
            canary_duration: Duration::from_secs(config.live_quotes.expansion.canary_duration_secs),
            priority_duration: Duration::from_secs(
                config.live_quotes.expansion.priority_duration_secs,
            ),
            canary_symbols: config
                .live_quotes
                .expansion
                .canary_symbols
                .iter()
                .cloned()
                .collect::<HashSet<_>>(),
            priority_symbols: config
                .live_quotes
                .expansion
                .priority_symbols
                .iter()
                .cloned()
                .collect::<HashSet<_>>(),
            allowlist: config.symbols.iter().cloned().collect::<HashSet<_>>(),
        });

        let live = Arc::new(LiveQuoteAdapter::new(
            config.live_quotes.clone(),
            manager,
            Arc::new(MockQuotesAdapter::new()),
            expansion,
            governor,
            hotpath,
            metrics.clone(),
        ));

        // Paper side.
        let outbox = Arc::new(
            Outbox::open(&config.paper.outbox_path).context("Failed to open outbox ledger")?,
        );
        let portfolio = Arc::new(RwLock::new(Portfolio::new()));
        let paper = Arc::new(PaperExecutor::new(
            outbox,
            Arc::clone(&portfolio),
            Arc::new(UniformLatency::new(
                config.paper.latency_min_ms,
                config.paper.latency_max_ms,
            )),
            Arc::new(UniformSlippage::new(
                config.paper.slippage_min_bps,
                config.paper.slippage_max_bps,
            )),
            config.paper.dedupe_window_secs,
            metrics.clone(),
        ));

        // Risk hooks and overrides.
        let drawdown = Arc::new(DrawdownHook::new(config.risk_controls.max_drawdown_pct));
        let hooks = risk_hooks::build_hooks(
            Arc::clone(&portfolio),
            &config.risk_controls,
            Arc::clone(&drawdown),
        );
        let overrides = Arc::new(OverrideStore::new());

        let static_earnings = match &config.earnings_path {
            Some(path) => load_earnings(Path::new(path))?,
            None => Vec::new(),
        };

        let tables = Arc::new(RwLock::new(IngestTables::new()));

        let evaluator = Arc::new(Evaluator::new(
            config.symbols.clone(),
            &config.decision,
            config.risk_controls.clone(),
            Arc::clone(&tables),
            Arc::clone(&live),
            Arc::clone(&overrides),
            hooks,
            drawdown,
            static_earnings,
            Arc::clone(&paper),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            metrics,
            tables,
            overrides,
            live,
            paper,
            evaluator,
            shutdown_tx,
        })
    }

    fn build_transport(&self) -> Arc<dyn EventTransport> {
        match self.config.transport.mode.as_str() {
            "sse" => Arc::new(SseTransport::new(
                self.config.transport.clone(),
                self.metrics.clone(),
            )),
            _ => Arc::new(PollTransport::new(
                self.config.transport.clone(),
                self.metrics.clone(),
            )),
        }
    }

    /// Overrides file poller (L). Applies only strictly higher versions.
    fn spawn_overrides_poller(&self) {
        let Some(path) = self.config.overrides.path.clone() else {
            return;
        };
        let store = Arc::clone(&self.overrides);
        let interval = Duration::from_millis(self.config.overrides.refresh_interval_ms);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match std::fs::read_to_string(&path) {
                            Ok(raw) => match serde_json::from_str::<RuntimeOverrides>(&raw) {
                                Ok(candidate) => {
                                    store.apply(candidate);
                                }
                                Err(e) => {
                                    warn!("Application: Unreadable overrides file: {}", e);
                                }
                            },
                            Err(e) => {
                                warn!("Application: Failed to read overrides file {}: {}", path, e);
                            }
                        }
                    }
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    /// State-persistence and health tickers (T5, T6).
    fn spawn_maintenance(&self) {
        let live = Arc::clone(&self.live);
        let snapshot_interval =
            Duration::from_secs(self.config.live_quotes.snapshot_interval_secs.max(1));
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(snapshot_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => live.persist_state(),
                    _ = shutdown.changed() => return,
                }
            }
        });

        let live = Arc::clone(&self.live);
        let health_interval =
            Duration::from_secs(self.config.live_quotes.health_check_interval_secs.max(1));
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => live.run_health_checks().await,
                    _ = shutdown.changed() => return,
                }
            }
        });
    }

    /// Runs ingestion to completion, evaluates, and shuts down. The
    /// oneshot path prints per-symbol lines and the promotion summary.
    pub async fn run(&self) -> Result<()> {
        self.spawn_overrides_poller();
        self.spawn_maintenance();

        if self.config.transport.enabled {
            let transport = self.build_transport();
            let rx = transport
                .start(self.shutdown_tx.subscribe())
                .await
                .context("Failed to start event transport")?;

            let consumer = IngestConsumer::new(
                Arc::clone(&self.tables),
                self.metrics.clone(),
                self.config.transport.max_events,
                self.config.transport.duration_seconds.map(Duration::from_secs),
            );

            if self.config.oneshot {
                let (count, stop) = consumer.run(rx, self.shutdown_tx.subscribe()).await;
                info!("Application: Ingestion finished ({} events, {:?})", count, stop);
                transport.close().await;
            } else {
                let shutdown_rx = self.shutdown_tx.subscribe();
                tokio::spawn(async move {
                    let (count, stop) = consumer.run(rx, shutdown_rx).await;
                    info!("Application: Ingestion finished ({} events, {:?})", count, stop);
                });
            }
        } else {
            info!("Application: Wire ingestion disabled");
        }

        if self.config.oneshot {
            self.evaluator.evaluate_all(true).await;
        } else {
            let interval = Duration::from_millis(self.config.evaluation_interval_ms.max(250));
            let evaluator = Arc::clone(&self.evaluator);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let handle =
                tokio::spawn(async move { evaluator.run_periodic(interval, shutdown_rx).await });

            tokio::signal::ctrl_c()
                .await
                .context("Failed to wait for shutdown signal")?;
            info!("Application: Shutdown signal received");
            let _ = self.shutdown_tx.send(true);
            let _ = handle.await;
        }

        self.shutdown().await;
        Ok(())
    }

    /// Graceful shutdown: drain fills, close adapters, final snapshot.
    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.paper
            .drain(Duration::from_millis(
                self.config.transport.shutdown_timeout_ms,
            ))
            .await;
        self.live.close().await;

        let report = self
            .live
            .promotion_report(&PromotionThresholds::default());
        match serde_json::to_string_pretty(&report) {
            Ok(body) => info!("Application: Promotion report\n{}", body),
            Err(e) => warn!("Application: Failed to render promotion report: {}", e),
        }

        info!(
            "Application: Done. {} news items ingested, cache entries {}",
            self.tables
                .read()
                .expect("tables lock poisoned")
                .news_len(),
            self.live.cache_len()
        );
    }
}
