use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::{EarningsEvent, EarningsStatus};

fn default_version() -> u32 {
    1
}

/// Typed event kinds carried on the wire. Anything else is counted and
/// dropped by the ingestion consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    News,
    Tick,
    Halt,
    Earnings,
    #[serde(other)]
    Unknown,
}

/// Envelope shared by the HTTP-poll and SSE transports. Event ids are
/// stable and replayable via the stream cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub id: String,
    pub ts_utc: DateTime<Utc>,
    pub payload: serde_json::Value,
    #[serde(default = "default_version")]
    pub v: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickPayload {
    pub symbol: String,
    pub last: f64,
    pub vwap_5m: f64,
    pub rel_volume: f64,
    pub halted: bool,
    pub bid: f64,
    pub ask: f64,
    // Absent on the wire; fixture files may carry them.
    #[serde(default)]
    pub premarket: bool,
    #[serde(default)]
    pub postmarket: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsPayload {
    pub id: String,
    pub provider: String,
    pub published_at_utc: DateTime<Utc>,
    pub headline: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub is_press_release: bool,
    #[serde(default)]
    pub is_correction: bool,
    #[serde(default)]
    pub supersedes_id: Option<String>,
    #[serde(default = "NewsPayload::default_source_weight")]
    pub source_weight: f64,
    pub headline_hash: String,
}

impl NewsPayload {
    fn default_source_weight() -> f64 {
        1.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaltPayload {
    pub symbol: String,
    pub halted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsPayload {
    pub symbol: String,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl EarningsPayload {
    pub fn into_event(self) -> EarningsEvent {
        let status = if self.kind.eq_ignore_ascii_case("estimated") {
            EarningsStatus::Estimated
        } else {
            EarningsStatus::Confirmed
        };
        EarningsEvent {
            symbol: self.symbol,
            start_utc: self.start_utc,
            end_utc: self.end_utc,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let raw = r#"{"type":"tick","id":"42","ts_utc":"2025-06-02T14:30:00Z","payload":{"symbol":"AAPL","last":207.0,"vwap_5m":205.0,"rel_volume":1.2,"halted":false,"bid":206.9,"ask":207.1},"v":1}"#;
        let ev: WireEvent = serde_json::from_str(raw).expect("parse envelope");
        assert_eq!(ev.kind, EventKind::Tick);
        assert_eq!(ev.id, "42");

        let tick: TickPayload = serde_json::from_value(ev.payload).expect("parse tick");
        assert_eq!(tick.symbol, "AAPL");
        // Session flags are absent on the wire and default to false.
        assert!(!tick.premarket);
        assert!(!tick.postmarket);
    }

    #[test]
    fn test_unknown_event_kind() {
        let raw = r#"{"type":"weather","id":"1","ts_utc":"2025-06-02T14:30:00Z","payload":{}}"#;
        let ev: WireEvent = serde_json::from_str(raw).expect("parse envelope");
        assert_eq!(ev.kind, EventKind::Unknown);
        assert_eq!(ev.v, 1);
    }

    #[test]
    fn test_earnings_payload_status_mapping() {
        let raw = r#"{"symbol":"BIOX","start_utc":"2025-06-02T20:00:00Z","end_utc":"2025-06-02T21:00:00Z","type":"estimated"}"#;
        let p: EarningsPayload = serde_json::from_str(raw).expect("parse earnings");
        assert_eq!(p.into_event().status, EarningsStatus::Estimated);
    }
}
