use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::TransportSection;
use crate::domain::ports::EventTransport;
use crate::domain::wire::WireEvent;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::transport::backoff_delay;

/// Body of `GET /stream?since=<cursor>`.
#[derive(Debug, Deserialize)]
pub struct StreamResponse {
    pub events: Vec<WireEvent>,
    pub cursor: String,
}

/// Cursored HTTP-poll transport. Replays from "0" (or a handed-over
/// cursor), sleeps between non-empty polls, backs off with jitter on
/// errors, and treats an empty batch as end-of-stream for the finite
/// fixture server.
pub struct PollTransport {
    cfg: TransportSection,
    client: reqwest::Client,
    cursor: Arc<Mutex<String>>,
    metrics: Metrics,
}

impl PollTransport {
    pub fn new(cfg: TransportSection, metrics: Metrics) -> Self {
        Self::with_cursor(cfg, metrics, "0".to_string())
    }

    /// Starts from an existing cursor; used when the SSE transport falls
    /// back mid-stream.
    pub fn with_cursor(cfg: TransportSection, metrics: Metrics, cursor: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            cfg,
            client,
            cursor: Arc::new(Mutex::new(cursor)),
            metrics,
        }
    }

    pub fn cursor(&self) -> String {
        self.cursor.lock().expect("cursor lock poisoned").clone()
    }

    async fn poll_once(
        client: &reqwest::Client,
        base_url: &str,
        cursor: &str,
    ) -> Result<StreamResponse> {
        let url = format!("{}/stream?since={}", base_url.trim_end_matches('/'), cursor);
        let response = client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("stream request failed with status {}", response.status());
        }
        Ok(response.json::<StreamResponse>().await?)
    }

    /// The pump loop, factored out so the SSE fallback can drive it on
    /// its own channel sender.
    pub(crate) async fn pump(
        cfg: TransportSection,
        client: reqwest::Client,
        cursor: Arc<Mutex<String>>,
        metrics: Metrics,
        tx: mpsc::Sender<WireEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("PollTransport: Shutdown requested, stopping");
                return;
            }

            let since = cursor.lock().expect("cursor lock poisoned").clone();
            match Self::poll_once(&client, &cfg.base_url, &since).await {
                Ok(batch) => {
                    attempt = 0;

                    if batch.events.is_empty() {
                        // The finite fixture server signals completion
                        // with an empty batch.
                        info!("PollTransport: Stream drained at cursor {}", since);
                        return;
                    }

                    debug!(
                        "PollTransport: {} events at cursor {} -> {}",
                        batch.events.len(),
                        since,
                        batch.cursor
                    );
                    *cursor.lock().expect("cursor lock poisoned") = batch.cursor;

                    for event in batch.events {
                        if tx.send(event).await.is_err() {
                            info!("PollTransport: Consumer gone, stopping");
                            return;
                        }
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(cfg.poll_interval_ms)) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    // Exponential backoff with +-100ms of jitter, capped.
                    let delay = backoff_delay(attempt, cfg.backoff_initial_ms, cfg.backoff_max_ms, 100);
                    attempt = attempt.saturating_add(1);
                    metrics
                        .transport_reconnects_total
                        .with_label_values(&["poll"])
                        .inc();
                    warn!(
                        "PollTransport: Poll failed ({}), retrying in {:?} (attempt {})",
                        e, delay, attempt
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl EventTransport for PollTransport {
    async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<mpsc::Receiver<WireEvent>> {
        let (tx, rx) = mpsc::channel(self.cfg.channel_capacity);

        info!(
            "PollTransport: Starting against {} (cursor {})",
            self.cfg.base_url,
            self.cursor()
        );

        tokio::spawn(Self::pump(
            self.cfg.clone(),
            self.client.clone(),
            Arc::clone(&self.cursor),
            self.metrics.clone(),
            tx,
            shutdown,
        ));

        Ok(rx)
    }

    async fn close(&self) {
        info!("PollTransport: Closed at cursor {}", self.cursor());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::wire::EventKind;

    #[test]
    fn test_stream_response_parsing() {
        let raw = r#"{
            "events": [
                {"type":"halt","id":"7","ts_utc":"2025-06-02T14:31:00Z","payload":{"symbol":"BIOX","halted":true}}
            ],
            "cursor": "8"
        }"#;
        let parsed: StreamResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.cursor, "8");
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].kind, EventKind::Halt);
    }

    #[test]
    fn test_empty_stream_response() {
        let raw = r#"{"events": [], "cursor": "42"}"#;
        let parsed: StreamResponse = serde_json::from_str(raw).expect("parse");
        assert!(parsed.events.is_empty());
    }
}
