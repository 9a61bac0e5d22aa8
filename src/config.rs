use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;

use crate::domain::decision::{CorroborationConfig, EmbargoConfig};
use crate::domain::symbols::CorporateAction;
use crate::infrastructure::quotes::health::HysteresisConfig;
use crate::infrastructure::quotes::hotpath::HotpathConfig;

/// Top-level configuration. Loaded from a TOML file, then overridden by
/// environment variables. Config errors are fatal at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trading universe (canonical symbols).
    pub symbols: Vec<String>,
    /// Evaluate each symbol once and exit instead of looping.
    pub oneshot: bool,
    /// Periodic evaluation interval in non-oneshot mode.
    pub evaluation_interval_ms: u64,
    /// Informational mode tag; this build only ever paper-trades.
    pub trading_mode: String,
    pub slack_enabled: bool,
    pub slack_webhook_url: String,
    pub earnings_path: Option<String>,
    pub decision: DecisionSection,
    pub risk_controls: RiskControlsSection,
    pub live_quotes: LiveQuotesSection,
    pub providers: ProvidersSection,
    pub budget: BudgetSection,
    pub transport: TransportSection,
    pub paper: PaperSection,
    pub overrides: OverridesSection,
    pub symbol_map: SymbolMapSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec!["AAPL".to_string()],
            oneshot: true,
            evaluation_interval_ms: 5_000,
            trading_mode: "paper".to_string(),
            slack_enabled: false,
            slack_webhook_url: String::new(),
            earnings_path: None,
            decision: DecisionSection::default(),
            risk_controls: RiskControlsSection::default(),
            live_quotes: LiveQuotesSection::default(),
            providers: ProvidersSection::default(),
            budget: BudgetSection::default(),
            transport: TransportSection::default(),
            paper: PaperSection::default(),
            overrides: OverridesSection::default(),
            symbol_map: SymbolMapSection::default(),
        }
    }
}

/// Provider symbol aliases and the corporate-action overlay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SymbolMapSection {
    pub mappings: Vec<SymbolMapping>,
    pub corporate_actions: HashMap<String, CorporateAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolMapping {
    pub provider: String,
    pub provider_symbol: String,
    pub canonical: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecisionSection {
    pub positive: f64,
    pub very_positive: f64,
    pub base_usd: f64,
    pub corroboration: CorroborationConfig,
    pub earnings_embargo: EmbargoConfig,
}

impl Default for DecisionSection {
    fn default() -> Self {
        Self {
            positive: 0.35,
            very_positive: 0.65,
            base_usd: 2_000.0,
            corroboration: CorroborationConfig::default(),
            earnings_embargo: EmbargoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskControlsSection {
    pub global_pause: bool,
    pub block_premarket: bool,
    pub block_postmarket: bool,
    pub max_spread_bps: f64,
    pub max_trades_per_symbol_per_day: u32,
    pub max_sector_exposure_pct: f64,
    pub sector_map: HashMap<String, String>,
    pub max_drawdown_pct: f64,
    pub stop_loss_pct: f64,
}

impl Default for RiskControlsSection {
    fn default() -> Self {
        Self {
            global_pause: false,
            block_premarket: true,
            block_postmarket: true,
            max_spread_bps: 80.0,
            max_trades_per_symbol_per_day: 5,
            max_sector_exposure_pct: 0.30,
            sector_map: HashMap::new(),
            max_drawdown_pct: 0.10,
            stop_loss_pct: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExpansionSection {
    pub canary_duration_secs: u64,
    pub priority_duration_secs: u64,
    pub canary_symbols: Vec<String>,
    pub priority_symbols: Vec<String>,
}

impl Default for ExpansionSection {
    fn default() -> Self {
        Self {
            canary_duration_secs: 1_800,
            priority_duration_secs: 3_600,
            canary_symbols: vec!["AAPL".to_string()],
            priority_symbols: vec!["AAPL".to_string(), "MSFT".to_string(), "NVDA".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveQuotesSection {
    pub enabled: bool,
    /// Force every symbol onto the mock adapter regardless of rollout.
    pub force_mock: bool,
    pub shadow_enabled: bool,
    pub shadow_sample_rate: f64,
    pub cache_capacity: usize,
    pub ttl_rth_ms: u64,
    pub ttl_after_hours_ms: u64,
    pub stale_ceiling_rth_ms: u64,
    pub stale_ceiling_after_hours_ms: u64,
    pub max_age_extend_ms: u64,
    /// Remaining-budget fraction below which cache extension kicks in.
    pub budget_warning_pct: f64,
    pub serve_stale_on_error: bool,
    pub fallback_to_mock: bool,
    pub active_provider: String,
    pub warm_provider: Option<String>,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    pub watchlist: Vec<String>,
    pub hysteresis: HysteresisConfig,
    pub hotpath: HotpathConfig,
    pub expansion: ExpansionSection,
    pub snapshot_path: String,
    pub snapshot_interval_secs: u64,
    pub health_check_interval_secs: u64,
}

impl Default for LiveQuotesSection {
    fn default() -> Self {
        Self {
            enabled: false,
            force_mock: false,
            shadow_enabled: true,
            shadow_sample_rate: 0.1,
            cache_capacity: 512,
            ttl_rth_ms: 3_000,
            ttl_after_hours_ms: 30_000,
            stale_ceiling_rth_ms: 15_000,
            stale_ceiling_after_hours_ms: 120_000,
            max_age_extend_ms: 10_000,
            budget_warning_pct: 0.25,
            serve_stale_on_error: true,
            fallback_to_mock: true,
            active_provider: "polygon".to_string(),
            warm_provider: Some("alpha_vantage".to_string()),
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 30,
            watchlist: Vec::new(),
            hysteresis: HysteresisConfig::default(),
            hotpath: HotpathConfig::default(),
            expansion: ExpansionSection::default(),
            snapshot_path: "data/live_quotes_state.json".to_string(),
            snapshot_interval_secs: 60,
            health_check_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub requests_per_minute: u32,
    pub max_requests_per_day: u32,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub ttl_ms: u64,
    pub stale_ceiling_ms: u64,
    pub cost_per_request_usd: f64,
    pub daily_limit_usd: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            requests_per_minute: 5,
            max_requests_per_day: 500,
            timeout_ms: 3_000,
            max_retries: 2,
            ttl_ms: 3_000,
            stale_ceiling_ms: 60_000,
            cost_per_request_usd: 0.0,
            daily_limit_usd: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvidersSection {
    pub alpha_vantage: ProviderConfig,
    pub polygon: ProviderConfig,
}

impl Default for ProvidersSection {
    fn default() -> Self {
        Self {
            alpha_vantage: ProviderConfig {
                base_url: "https://www.alphavantage.co/query".to_string(),
                requests_per_minute: 5,
                max_requests_per_day: 500,
                ..ProviderConfig::default()
            },
            polygon: ProviderConfig {
                base_url: "https://api.polygon.io".to_string(),
                requests_per_minute: 5,
                max_requests_per_day: 2_000,
                cost_per_request_usd: 0.004,
                ..ProviderConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    pub global_daily_limit_usd: f64,
    pub warning_threshold: f64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            global_daily_limit_usd: 25.0,
            warning_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SseSection {
    pub heartbeat_seconds: u64,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub max_attempts: u32,
    pub fallback_after_failures: u32,
}

impl Default for SseSection {
    fn default() -> Self {
        Self {
            heartbeat_seconds: 15,
            initial_delay_ms: 250,
            max_delay_ms: 8_000,
            jitter_ms: 200,
            max_attempts: 20,
            fallback_after_failures: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// Wire ingestion on/off. Off means the engine only sees whatever the
    /// fixture tables already contain.
    pub enabled: bool,
    /// "poll" or "sse".
    pub mode: String,
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub channel_capacity: usize,
    pub max_events: Option<u64>,
    pub duration_seconds: Option<u64>,
    pub shutdown_timeout_ms: u64,
    pub sse: SseSection,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: "poll".to_string(),
            base_url: "http://127.0.0.1:8091".to_string(),
            poll_interval_ms: 500,
            backoff_initial_ms: 200,
            backoff_max_ms: 10_000,
            channel_capacity: 1_024,
            max_events: None,
            duration_seconds: None,
            shutdown_timeout_ms: 3_000,
            sse: SseSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperSection {
    pub outbox_path: String,
    pub dedupe_window_secs: i64,
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
    pub slippage_min_bps: f64,
    pub slippage_max_bps: f64,
}

impl Default for PaperSection {
    fn default() -> Self {
        Self {
            outbox_path: "data/outbox.ndjson".to_string(),
            dedupe_window_secs: 60,
            latency_min_ms: 20,
            latency_max_ms: 150,
            slippage_min_bps: 0.0,
            slippage_max_bps: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverridesSection {
    pub path: Option<String>,
    pub refresh_interval_ms: u64,
}

impl Default for OverridesSection {
    fn default() -> Self {
        Self {
            path: None,
            refresh_interval_ms: 2_000,
        }
    }
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

impl Config {
    /// Loads the TOML file (when given) and applies environment
    /// overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", p.display()))?
            }
            None => Config::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides. Boolean variables accept 1/true/yes/on.
    pub fn apply_env(&mut self) {
        if let Some(pause) = env_bool("GLOBAL_PAUSE") {
            self.risk_controls.global_pause = pause;
        }
        if let Ok(mode) = env::var("TRADING_MODE") {
            self.trading_mode = mode;
        }
        if let Some(enabled) = env_bool("WIRE_ENABLED") {
            self.transport.enabled = enabled;
        }
        if let Some(enabled) = env_bool("SLACK_ENABLED") {
            self.slack_enabled = enabled;
        }
        if let Ok(url) = env::var("SLACK_WEBHOOK_URL") {
            self.slack_webhook_url = url;
        }
        if let Ok(mode) = env::var("TEST_MODE") {
            if mode == "fixtures" {
                // Fixture runs never touch live providers.
                self.live_quotes.enabled = false;
                self.live_quotes.force_mock = true;
            }
        }
        if let Some(enabled) = env_bool("LIVE_QUOTES_ENABLED") {
            self.live_quotes.enabled = enabled;
        }
        if let Some(enabled) = env_bool("SHADOW_MODE_ENABLED") {
            self.live_quotes.shadow_enabled = enabled;
        }
        if env_bool("DISABLE_LIVE_QUOTES") == Some(true) {
            self.live_quotes.enabled = false;
        }
        if env_bool("FORCE_MOCK_MODE") == Some(true) {
            self.live_quotes.force_mock = true;
        }
        if let Ok(adapter) = env::var("QUOTES") {
            self.live_quotes.active_provider = adapter;
        }
        if let Ok(key) = env::var("ALPHA_VANTAGE_API_KEY") {
            self.providers.alpha_vantage.api_key = key;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.decision.positive >= self.decision.very_positive {
            anyhow::bail!(
                "decision.positive ({}) must be below decision.very_positive ({})",
                self.decision.positive,
                self.decision.very_positive
            );
        }
        if self.decision.base_usd <= 0.0 {
            anyhow::bail!("decision.base_usd must be positive");
        }
        if self.paper.latency_min_ms > self.paper.latency_max_ms {
            anyhow::bail!("paper.latency_min_ms must not exceed paper.latency_max_ms");
        }
        if self.paper.slippage_min_bps > self.paper.slippage_max_bps {
            anyhow::bail!("paper.slippage_min_bps must not exceed paper.slippage_max_bps");
        }
        if !matches!(self.transport.mode.as_str(), "poll" | "sse") {
            anyhow::bail!(
                "transport.mode must be 'poll' or 'sse', got '{}'",
                self.transport.mode
            );
        }
        url::Url::parse(&self.transport.base_url)
            .with_context(|| format!("transport.base_url '{}' is not a valid URL", self.transport.base_url))?;
        if !(0.0..=1.0).contains(&self.live_quotes.shadow_sample_rate) {
            anyhow::bail!("live_quotes.shadow_sample_rate must be in [0, 1]");
        }
        Ok(())
    }
}
