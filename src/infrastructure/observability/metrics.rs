//! Prometheus metrics definitions for tradewire
//!
//! All metrics use the `tradewire_` prefix. The registry is an explicit
//! dependency passed to the components that record into it; rendering is
//! push-based (text exposition to logs or files), no HTTP server.

use prometheus::{
    CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericCounter, GenericGauge},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Decisions by symbol and intent
    pub decisions_total: CounterVec,
    /// Gate blocks by gate label and symbol
    pub decision_gate_blocks_total: CounterVec,
    /// Decision evaluation latency in seconds
    pub decision_latency_seconds: Histogram,
    /// Quote cache hits
    pub quote_cache_hits_total: GenericCounter<AtomicF64>,
    /// Quote cache misses
    pub quote_cache_misses_total: GenericCounter<AtomicF64>,
    /// Quote cache evictions
    pub quote_cache_evictions_total: GenericCounter<AtomicF64>,
    /// Live provider calls by provider and outcome
    pub live_calls_total: CounterVec,
    /// Shadow comparison samples
    pub shadow_samples_total: GenericCounter<AtomicF64>,
    /// Shadow comparison mismatches
    pub shadow_mismatches_total: GenericCounter<AtomicF64>,
    /// Hotpath invariant violations by severity
    pub hotpath_violations_total: CounterVec,
    /// Paper orders written by intent
    pub paper_orders_total: CounterVec,
    /// Paper fills applied by side
    pub paper_fills_total: CounterVec,
    /// Orders suppressed by the dedupe window
    pub paper_order_dedupe_total: GenericCounter<AtomicF64>,
    /// Transport reconnect attempts by transport kind
    pub transport_reconnects_total: CounterVec,
    /// Ingested events by type
    pub ingest_events_total: CounterVec,
    /// Dropped ingest events by reason
    pub ingest_dropped_total: CounterVec,
    /// Current live-adapter health (0=healthy, 1=degraded, 2=failed)
    pub live_health_state: GenericGauge<AtomicF64>,
    /// Budget utilization fraction (0-1)
    pub budget_used_ratio: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let decisions_total = CounterVec::new(
            Opts::new("tradewire_decisions_total", "Decisions by symbol and intent"),
            &["symbol", "intent"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        let decision_gate_blocks_total = CounterVec::new(
            Opts::new(
                "tradewire_decision_gate_blocks_total",
                "Gate blocks by gate label and symbol",
            ),
            &["gate", "symbol"],
        )?;
        registry.register(Box::new(decision_gate_blocks_total.clone()))?;

        let decision_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "tradewire_decision_latency_seconds",
                "Decision evaluation latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.00025, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1,
            ]),
        )?;
        registry.register(Box::new(decision_latency_seconds.clone()))?;

        let quote_cache_hits_total = GenericCounter::<AtomicF64>::with_opts(Opts::new(
            "tradewire_quote_cache_hits_total",
            "Quote cache hits",
        ))?;
        registry.register(Box::new(quote_cache_hits_total.clone()))?;

        let quote_cache_misses_total = GenericCounter::<AtomicF64>::with_opts(Opts::new(
            "tradewire_quote_cache_misses_total",
            "Quote cache misses",
        ))?;
        registry.register(Box::new(quote_cache_misses_total.clone()))?;

        let quote_cache_evictions_total = GenericCounter::<AtomicF64>::with_opts(Opts::new(
            "tradewire_quote_cache_evictions_total",
            "Quote cache evictions",
        ))?;
        registry.register(Box::new(quote_cache_evictions_total.clone()))?;

        let live_calls_total = CounterVec::new(
            Opts::new(
                "tradewire_live_calls_total",
                "Live provider calls by provider and outcome",
            ),
            &["provider", "outcome"],
        )?;
        registry.register(Box::new(live_calls_total.clone()))?;

        let shadow_samples_total = GenericCounter::<AtomicF64>::with_opts(Opts::new(
            "tradewire_shadow_samples_total",
            "Shadow comparison samples",
        ))?;
        registry.register(Box::new(shadow_samples_total.clone()))?;

        let shadow_mismatches_total = GenericCounter::<AtomicF64>::with_opts(Opts::new(
            "tradewire_shadow_mismatches_total",
            "Shadow comparison mismatches",
        ))?;
        registry.register(Box::new(shadow_mismatches_total.clone()))?;

        let hotpath_violations_total = CounterVec::new(
            Opts::new(
                "tradewire_hotpath_violations_total",
                "Hotpath invariant violations by severity",
            ),
            &["severity"],
        )?;
        registry.register(Box::new(hotpath_violations_total.clone()))?;

        let paper_orders_total = CounterVec::new(
            Opts::new("tradewire_paper_orders_total", "Paper orders written by intent"),
            &["intent"],
        )?;
        registry.register(Box::new(paper_orders_total.clone()))?;

        let paper_fills_total = CounterVec::new(
            Opts::new("tradewire_paper_fills_total", "Paper fills applied by side"),
            &["side"],
        )?;
        registry.register(Box::new(paper_fills_total.clone()))?;

        let paper_order_dedupe_total = GenericCounter::<AtomicF64>::with_opts(Opts::new(
            "tradewire_paper_order_dedupe_total",
            "Orders suppressed by the dedupe window",
        ))?;
        registry.register(Box::new(paper_order_dedupe_total.clone()))?;

        let transport_reconnects_total = CounterVec::new(
            Opts::new(
                "tradewire_transport_reconnects_total",
                "Transport reconnect attempts",
            ),
            &["transport"],
        )?;
        registry.register(Box::new(transport_reconnects_total.clone()))?;

        let ingest_events_total = CounterVec::new(
            Opts::new("tradewire_ingest_events_total", "Ingested events by type"),
            &["type"],
        )?;
        registry.register(Box::new(ingest_events_total.clone()))?;

        let ingest_dropped_total = CounterVec::new(
            Opts::new(
                "tradewire_ingest_dropped_total",
                "Dropped ingest events by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(ingest_dropped_total.clone()))?;

        let live_health_state = Gauge::with_opts(Opts::new(
            "tradewire_live_health_state",
            "Live adapter health (0=healthy, 1=degraded, 2=failed)",
        ))?;
        registry.register(Box::new(live_health_state.clone()))?;

        let budget_used_ratio = Gauge::with_opts(Opts::new(
            "tradewire_budget_used_ratio",
            "Global daily budget utilization (0-1)",
        ))?;
        registry.register(Box::new(budget_used_ratio.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            decisions_total,
            decision_gate_blocks_total,
            decision_latency_seconds,
            quote_cache_hits_total,
            quote_cache_misses_total,
            quote_cache_evictions_total,
            live_calls_total,
            shadow_samples_total,
            shadow_mismatches_total,
            hotpath_violations_total,
            paper_orders_total,
            paper_fills_total,
            paper_order_dedupe_total,
            transport_reconnects_total,
            ingest_events_total,
            ingest_dropped_total,
            live_health_state,
            budget_used_ratio,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_decision(&self, symbol: &str, intent: &str) {
        self.decisions_total
            .with_label_values(&[symbol, intent])
            .inc();
    }

    pub fn inc_gate_block(&self, gate: &str, symbol: &str) {
        self.decision_gate_blocks_total
            .with_label_values(&[gate, symbol])
            .inc();
    }

    pub fn inc_live_call(&self, provider: &str, outcome: &str) {
        self.live_calls_total
            .with_label_values(&[provider, outcome])
            .inc();
    }

    pub fn inc_ingest(&self, kind: &str) {
        self.ingest_events_total.with_label_values(&[kind]).inc();
    }

    pub fn inc_ingest_drop(&self, reason: &str) {
        self.ingest_dropped_total.with_label_values(&[reason]).inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_decision("AAPL", "BUY_1X");
        assert!(metrics.render().contains("tradewire_"));
    }

    #[test]
    fn test_gate_block_counter_labels() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_gate_block("halt", "AAPL");
        metrics.inc_gate_block("global_pause", "MSFT");
        let output = metrics.render();
        assert!(output.contains("tradewire_decision_gate_blocks_total"));
        assert!(output.contains("halt"));
        assert!(output.contains("global_pause"));
    }

    #[test]
    fn test_dedupe_counter() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.paper_order_dedupe_total.inc();
        let output = metrics.render();
        assert!(output.contains("tradewire_paper_order_dedupe_total 1"));
    }
}
