use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::TransportSection;
use crate::domain::ports::EventTransport;
use crate::domain::wire::WireEvent;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::transport::backoff_delay;
use crate::infrastructure::transport::poll::PollTransport;

/// One parsed server-sent-events frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// Data-less comment line; the server uses these as heartbeats.
    Comment,
    Event {
        id: Option<String>,
        data: String,
    },
}

/// Incremental SSE framing: feed chunks in, get completed frames out.
/// Fields accumulate until a blank line terminates the frame.
#[derive(Default)]
pub struct SseFrameParser {
    buffer: String,
    current_id: Option<String>,
    current_data: Vec<String>,
    saw_comment: bool,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.current_data.is_empty() {
                    frames.push(SseFrame::Event {
                        id: self.current_id.take(),
                        data: self.current_data.join("\n"),
                    });
                    self.current_data.clear();
                } else if self.saw_comment {
                    frames.push(SseFrame::Comment);
                }
                self.saw_comment = false;
            } else if let Some(rest) = line.strip_prefix(':') {
                debug!("SseFrameParser: Heartbeat comment '{}'", rest.trim());
                self.saw_comment = true;
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.current_data.push(rest.trim_start().to_string());
            } else if let Some(rest) = line.strip_prefix("id:") {
                self.current_id = Some(rest.trim().to_string());
            } else if line.starts_with("event:") || line.starts_with("retry:") {
                // Event names and retry hints are irrelevant; the type
                // travels inside the JSON envelope.
            }
        }

        frames
    }
}

/// Long-lived SSE transport with reconnection and transparent fallback
/// to HTTP-poll after repeated failures.
pub struct SseTransport {
    cfg: TransportSection,
    cursor: Arc<Mutex<String>>,
    metrics: Metrics,
}

impl SseTransport {
    pub fn new(cfg: TransportSection, metrics: Metrics) -> Self {
        Self {
            cfg,
            cursor: Arc::new(Mutex::new("0".to_string())),
            metrics,
        }
    }

    pub fn cursor(&self) -> String {
        self.cursor.lock().expect("cursor lock poisoned").clone()
    }

    /// One connection lifetime. Returns Ok(true) when the server closed
    /// the stream cleanly, Ok(false) on consumer hangup.
    async fn run_connection(
        cfg: &TransportSection,
        client: &reqwest::Client,
        cursor: &Arc<Mutex<String>>,
        tx: &mpsc::Sender<WireEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool> {
        let since = cursor.lock().expect("cursor lock poisoned").clone();
        let url = format!(
            "{}/stream?since={}",
            cfg.base_url.trim_end_matches('/'),
            since
        );

        let response = client
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("sse request failed with status {}", response.status());
        }

        info!("SseTransport: Connected at cursor {}", since);

        let mut stream = response.bytes_stream();
        let mut parser = SseFrameParser::new();
        // Two missed heartbeats mean the connection is dead.
        let liveness = Duration::from_secs(cfg.sse.heartbeat_seconds * 2);

        loop {
            let chunk = tokio::select! {
                chunk = tokio::time::timeout(liveness, stream.next()) => chunk,
                _ = shutdown.changed() => return Ok(true),
            };

            let chunk = match chunk {
                Err(_) => anyhow::bail!("heartbeat missed for {:?}", liveness),
                Ok(None) => return Ok(true),
                Ok(Some(Err(e))) => anyhow::bail!("stream error: {}", e),
                Ok(Some(Ok(bytes))) => bytes,
            };

            for frame in parser.push(&String::from_utf8_lossy(&chunk)) {
                match frame {
                    SseFrame::Comment => {
                        debug!("SseTransport: Heartbeat");
                    }
                    SseFrame::Event { id, data } => {
                        match serde_json::from_str::<WireEvent>(&data) {
                            Ok(event) => {
                                let next_cursor =
                                    id.unwrap_or_else(|| event.id.clone());
                                *cursor.lock().expect("cursor lock poisoned") = next_cursor;
                                if tx.send(event).await.is_err() {
                                    return Ok(false);
                                }
                            }
                            Err(e) => {
                                warn!("SseTransport: Dropping malformed event: {}", e);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn pump(
        cfg: TransportSection,
        cursor: Arc<Mutex<String>>,
        metrics: Metrics,
        tx: mpsc::Sender<WireEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let client = reqwest::Client::new();
        let mut attempts: u32 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("SseTransport: Shutdown requested, stopping");
                return;
            }

            match Self::run_connection(&cfg, &client, &cursor, &tx, &mut shutdown).await {
                Ok(_) => {
                    info!("SseTransport: Stream closed");
                    return;
                }
                Err(e) => {
                    attempts += 1;
                    consecutive_failures += 1;
                    metrics
                        .transport_reconnects_total
                        .with_label_values(&["sse"])
                        .inc();

                    if consecutive_failures >= cfg.sse.fallback_after_failures {
                        let since = cursor.lock().expect("cursor lock poisoned").clone();
                        warn!(
                            "SseTransport: {} consecutive failures, falling back to HTTP-poll at cursor {}",
                            consecutive_failures, since
                        );
                        let poll_client = reqwest::Client::builder()
                            .timeout(Duration::from_secs(10))
                            .build()
                            .unwrap_or_else(|_| reqwest::Client::new());
                        PollTransport::pump(
                            cfg.clone(),
                            poll_client,
                            Arc::clone(&cursor),
                            metrics.clone(),
                            tx,
                            shutdown,
                        )
                        .await;
                        return;
                    }

                    if attempts >= cfg.sse.max_attempts {
                        warn!(
                            "SseTransport: Giving up after {} reconnect attempts: {}",
                            attempts, e
                        );
                        return;
                    }

                    let delay = backoff_delay(
                        consecutive_failures.saturating_sub(1),
                        cfg.sse.initial_delay_ms,
                        cfg.sse.max_delay_ms,
                        cfg.sse.jitter_ms,
                    );
                    warn!(
                        "SseTransport: Connection lost ({}), reconnecting in {:?} (attempt {})",
                        e, delay, attempts
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
impl EventTransport for SseTransport {
    async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<mpsc::Receiver<WireEvent>> {
        let (tx, rx) = mpsc::channel(self.cfg.channel_capacity);

        info!("SseTransport: Starting against {}", self.cfg.base_url);

        tokio::spawn(Self::pump(
            self.cfg.clone(),
            Arc::clone(&self.cursor),
            self.metrics.clone(),
            tx,
            shutdown,
        ));

        Ok(rx)
    }

    async fn close(&self) {
        info!("SseTransport: Closed at cursor {}", self.cursor());
    }
}
