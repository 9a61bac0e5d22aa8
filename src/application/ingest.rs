use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::domain::types::{Advice, EarningsEvent, Features};
use crate::domain::wire::{EarningsPayload, EventKind, HaltPayload, NewsPayload, TickPayload, WireEvent};
use crate::infrastructure::news::SentimentAnalyzer;
use crate::infrastructure::observability::Metrics;

/// Trend-heuristic advice parameters: a weak, low-confidence nudge in
/// the direction of `last` vs `vwap_5m`.
const TREND_SCORE: f64 = 0.15;
const TREND_CONFIDENCE: f64 = 0.5;
const TREND_SOURCE_WEIGHT: f64 = 0.5;

/// A scored news item retained for advice derivation.
#[derive(Debug, Clone)]
pub struct NewsRecord {
    pub payload: NewsPayload,
    pub score: f64,
}

/// In-memory tables fed by the wire: ticks, halts, news, earnings.
/// The decision loop reads consistent snapshots out of them.
#[derive(Default)]
pub struct IngestTables {
    ticks: HashMap<String, TickPayload>,
    halts: HashMap<String, bool>,
    news: Vec<NewsRecord>,
    earnings: Vec<EarningsEvent>,
    seen_headline_hashes: HashSet<String>,
}

impl IngestTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatches one envelope into the tables. Returns false when the
    /// event was dropped (unknown type, malformed payload, duplicate).
    pub fn apply(
        &mut self,
        event: &WireEvent,
        sentiment: &SentimentAnalyzer,
        metrics: &Metrics,
    ) -> bool {
        match event.kind {
            EventKind::Tick => match serde_json::from_value::<TickPayload>(event.payload.clone()) {
                Ok(tick) => {
                    metrics.inc_ingest("tick");
                    self.ticks.insert(tick.symbol.to_uppercase(), tick);
                    true
                }
                Err(e) => {
                    warn!("IngestTables: Malformed tick payload: {}", e);
                    metrics.inc_ingest_drop("malformed");
                    false
                }
            },
            EventKind::Halt => match serde_json::from_value::<HaltPayload>(event.payload.clone()) {
                Ok(halt) => {
                    metrics.inc_ingest("halt");
                    self.halts.insert(halt.symbol.to_uppercase(), halt.halted);
                    true
                }
                Err(e) => {
                    warn!("IngestTables: Malformed halt payload: {}", e);
                    metrics.inc_ingest_drop("malformed");
                    false
                }
            },
            EventKind::News => match serde_json::from_value::<NewsPayload>(event.payload.clone()) {
                Ok(news) => self.apply_news(news, sentiment, metrics),
                Err(e) => {
                    warn!("IngestTables: Malformed news payload: {}", e);
                    metrics.inc_ingest_drop("malformed");
                    false
                }
            },
            EventKind::Earnings => {
                match serde_json::from_value::<EarningsPayload>(event.payload.clone()) {
                    Ok(earnings) => {
                        metrics.inc_ingest("earnings");
                        self.earnings.push(earnings.into_event());
                        true
                    }
                    Err(e) => {
                        warn!("IngestTables: Malformed earnings payload: {}", e);
                        metrics.inc_ingest_drop("malformed");
                        false
                    }
                }
            }
            EventKind::Unknown => {
                metrics.inc_ingest_drop("unknown_type");
                false
            }
        }
    }

    fn apply_news(
        &mut self,
        news: NewsPayload,
        sentiment: &SentimentAnalyzer,
        metrics: &Metrics,
    ) -> bool {
        if !self.seen_headline_hashes.insert(news.headline_hash.clone()) {
            debug!(
                "IngestTables: Duplicate headline {} dropped",
                news.headline_hash
            );
            metrics.inc_ingest_drop("duplicate_headline");
            return false;
        }

        // A correction replaces the item it supersedes; the old item no
        // longer contributes advice.
        if news.is_correction {
            if let Some(superseded) = &news.supersedes_id {
                let before = self.news.len();
                self.news.retain(|record| &record.payload.id != superseded);
                if self.news.len() < before {
                    info!(
                        "IngestTables: Correction {} superseded news {}",
                        news.id, superseded
                    );
                }
            }
        }

        let score = sentiment.analyze_news(&news.headline, &news.body);
        metrics.inc_ingest("news");
        self.news.push(NewsRecord { payload: news, score });
        true
    }

    pub fn push_earnings(&mut self, events: Vec<EarningsEvent>) {
        self.earnings.extend(events);
    }

    /// Feature snapshot for a symbol, built from the latest tick and the
    /// halt table. Session flags default to false in wire mode.
    pub fn features_for(&self, symbol: &str) -> Option<Features> {
        let key = symbol.to_uppercase();
        let tick = self.ticks.get(&key)?;
        let halted = self.halts.get(&key).copied().unwrap_or(tick.halted);
        let mid = (tick.bid + tick.ask) / 2.0;
        let spread_bps = if mid > 0.0 {
            (tick.ask - tick.bid) / mid * 10_000.0
        } else {
            0.0
        };
        Some(Features {
            symbol: key,
            halted,
            last: tick.last,
            vwap_5m: tick.vwap_5m,
            rel_volume: tick.rel_volume,
            premarket: tick.premarket,
            postmarket: tick.postmarket,
            spread_bps,
        })
    }

    /// All advice for a symbol: one per scored news item naming it in
    /// `tickers`, plus the trend-heuristic advice when a tick exists.
    pub fn advice_for(&self, symbol: &str, now: DateTime<Utc>) -> Vec<Advice> {
        let key = symbol.to_uppercase();
        let mut advice: Vec<Advice> = self
            .news
            .iter()
            .filter(|record| {
                record
                    .payload
                    .tickers
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&key))
            })
            .map(|record| Advice {
                symbol: key.clone(),
                score: record.score,
                confidence: 0.6,
                source_weight: record.payload.source_weight,
                provider: record.payload.provider.clone(),
                is_press_release: record.payload.is_press_release,
                published_at: record.payload.published_at_utc,
            })
            .collect();

        if let Some(tick) = self.ticks.get(&key) {
            let direction = if tick.last > tick.vwap_5m { 1.0 } else { -1.0 };
            advice.push(Advice {
                symbol: key,
                score: direction * TREND_SCORE,
                confidence: TREND_CONFIDENCE,
                source_weight: TREND_SOURCE_WEIGHT,
                provider: "trend".to_string(),
                is_press_release: false,
                published_at: now,
            });
        }

        advice
    }

    pub fn earnings(&self) -> Vec<EarningsEvent> {
        self.earnings.clone()
    }

    pub fn tick_symbols(&self) -> Vec<String> {
        self.ticks.keys().cloned().collect()
    }

    pub fn news_len(&self) -> usize {
        self.news.len()
    }
}

/// Why the ingestion loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStop {
    ChannelClosed,
    MaxEvents,
    Deadline,
    Cancelled,
}

/// Drains the envelope channel into the tables until the channel closes,
/// the event cap or deadline is reached, or shutdown is signalled.
pub struct IngestConsumer {
    tables: Arc<RwLock<IngestTables>>,
    sentiment: SentimentAnalyzer,
    metrics: Metrics,
    max_events: Option<u64>,
    deadline: Option<Duration>,
}

impl IngestConsumer {
    pub fn new(
        tables: Arc<RwLock<IngestTables>>,
        metrics: Metrics,
        max_events: Option<u64>,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            tables,
            sentiment: SentimentAnalyzer::new(),
            metrics,
            max_events,
            deadline,
        }
    }

    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<WireEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> (u64, IngestStop) {
        let mut count: u64 = 0;
        let deadline_at = self.deadline.map(|d| tokio::time::Instant::now() + d);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            {
                                let mut tables =
                                    self.tables.write().expect("ingest tables lock poisoned");
                                tables.apply(&event, &self.sentiment, &self.metrics);
                            }
                            count += 1;
                            if let Some(max) = self.max_events {
                                if count >= max {
                                    info!("IngestConsumer: Event cap {} reached", max);
                                    return (count, IngestStop::MaxEvents);
                                }
                            }
                        }
                        None => {
                            info!("IngestConsumer: Channel closed after {} events", count);
                            return (count, IngestStop::ChannelClosed);
                        }
                    }
                }
                _ = async { tokio::time::sleep_until(deadline_at.expect("guarded")).await }, if deadline_at.is_some() => {
                    info!("IngestConsumer: Deadline reached after {} events", count);
                    return (count, IngestStop::Deadline);
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("IngestConsumer: Cancelled after {} events", count);
                        return (count, IngestStop::Cancelled);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(kind: &str, payload: serde_json::Value) -> WireEvent {
        serde_json::from_value(json!({
            "type": kind,
            "id": "1",
            "ts_utc": "2025-06-02T14:30:00Z",
            "payload": payload,
        }))
        .expect("envelope")
    }

    fn tick(symbol: &str, last: f64, vwap: f64) -> WireEvent {
        envelope(
            "tick",
            json!({
                "symbol": symbol,
                "last": last,
                "vwap_5m": vwap,
                "rel_volume": 1.4,
                "halted": false,
                "bid": last - 0.05,
                "ask": last + 0.05,
            }),
        )
    }

    fn news(id: &str, hash: &str, headline: &str, tickers: Vec<&str>) -> WireEvent {
        envelope(
            "news",
            json!({
                "id": id,
                "provider": "reuters",
                "published_at_utc": "2025-06-02T14:00:00Z",
                "headline": headline,
                "body": "",
                "tickers": tickers,
                "is_press_release": false,
                "source_weight": 1.0,
                "headline_hash": hash,
            }),
        )
    }

    fn setup() -> (IngestTables, SentimentAnalyzer, Metrics) {
        (
            IngestTables::new(),
            SentimentAnalyzer::new(),
            Metrics::new().expect("metrics"),
        )
    }

    #[test]
    fn test_tick_builds_features() {
        let (mut tables, sentiment, metrics) = setup();
        assert!(tables.apply(&tick("AAPL", 207.0, 205.0), &sentiment, &metrics));

        let features = tables.features_for("AAPL").expect("features");
        assert_eq!(features.last, 207.0);
        assert!(!features.premarket);
        assert!(features.spread_bps > 0.0);
    }

    #[test]
    fn test_halt_event_overrides_tick_flag() {
        let (mut tables, sentiment, metrics) = setup();
        tables.apply(&tick("BIOX", 12.0, 11.0), &sentiment, &metrics);
        tables.apply(
            &envelope("halt", serde_json::json!({"symbol": "BIOX", "halted": true})),
            &sentiment,
            &metrics,
        );

        assert!(tables.features_for("BIOX").expect("features").halted);
    }

    #[test]
    fn test_duplicate_headline_dropped() {
        let (mut tables, sentiment, metrics) = setup();
        assert!(tables.apply(
            &news("n1", "hash-a", "Shares surge on record revenue", vec!["AAPL"]),
            &sentiment,
            &metrics
        ));
        assert!(!tables.apply(
            &news("n2", "hash-a", "Shares surge on record revenue", vec!["AAPL"]),
            &sentiment,
            &metrics
        ));
        assert_eq!(tables.news_len(), 1);
    }

    #[test]
    fn test_unknown_event_type_dropped() {
        let (mut tables, sentiment, metrics) = setup();
        assert!(!tables.apply(
            &envelope("weather", serde_json::json!({})),
            &sentiment,
            &metrics
        ));
    }

    #[test]
    fn test_correction_supersedes_earlier_news() {
        let (mut tables, sentiment, metrics) = setup();
        tables.apply(
            &news("n1", "hash-a", "Company announces breakthrough", vec!["BIOX"]),
            &sentiment,
            &metrics,
        );

        let correction = envelope(
            "news",
            serde_json::json!({
                "id": "n2",
                "provider": "reuters",
                "published_at_utc": "2025-06-02T15:00:00Z",
                "headline": "Correction: earlier report overstated results",
                "body": "",
                "tickers": ["BIOX"],
                "is_press_release": false,
                "is_correction": true,
                "supersedes_id": "n1",
                "source_weight": 1.0,
                "headline_hash": "hash-b",
            }),
        );
        tables.apply(&correction, &sentiment, &metrics);

        let advice = tables.advice_for("BIOX", Utc::now());
        // Only the correction itself remains as news-derived advice.
        assert_eq!(
            advice.iter().filter(|a| a.provider == "reuters").count(),
            1
        );
    }

    #[test]
    fn test_trend_advice_follows_vwap() {
        let (mut tables, sentiment, metrics) = setup();
        tables.apply(&tick("AAPL", 207.0, 205.0), &sentiment, &metrics);

        let advice = tables.advice_for("AAPL", Utc::now());
        let trend = advice
            .iter()
            .find(|a| a.provider == "trend")
            .expect("trend advice");
        assert!(trend.score > 0.0);

        tables.apply(&tick("AAPL", 203.0, 205.0), &sentiment, &metrics);
        let advice = tables.advice_for("AAPL", Utc::now());
        let trend = advice
            .iter()
            .find(|a| a.provider == "trend")
            .expect("trend advice");
        assert!(trend.score < 0.0);
    }

    #[tokio::test]
    async fn test_consumer_respects_event_cap() {
        let tables = Arc::new(RwLock::new(IngestTables::new()));
        let metrics = Metrics::new().expect("metrics");
        let consumer = IngestConsumer::new(Arc::clone(&tables), metrics, Some(2), None);

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        for i in 0..5 {
            tx.send(tick(&format!("SYM{}", i), 100.0, 99.0))
                .await
                .expect("send");
        }

        let (count, stop) = consumer.run(rx, shutdown_rx).await;
        assert_eq!(count, 2);
        assert_eq!(stop, IngestStop::MaxEvents);
    }

    #[tokio::test]
    async fn test_consumer_stops_on_channel_close() {
        let tables = Arc::new(RwLock::new(IngestTables::new()));
        let metrics = Metrics::new().expect("metrics");
        let consumer = IngestConsumer::new(Arc::clone(&tables), metrics, None, None);

        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(tick("AAPL", 100.0, 99.0)).await.expect("send");
        drop(tx);

        let (count, stop) = consumer.run(rx, shutdown_rx).await;
        assert_eq!(count, 1);
        assert_eq!(stop, IngestStop::ChannelClosed);
    }
}
