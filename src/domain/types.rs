use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::errors::QuoteError;

/// Market session a quote was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Session {
    #[serde(rename = "PRE")]
    Pre,
    #[serde(rename = "RTH")]
    Rth,
    #[serde(rename = "POST")]
    Post,
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Session::Pre => write!(f, "PRE"),
            Session::Rth => write!(f, "RTH"),
            Session::Post => write!(f, "POST"),
            Session::Closed => write!(f, "CLOSED"),
            Session::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// A normalized quote from any provider. `symbol` is always the canonical
/// form produced by the symbol normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
    pub session: Session,
    pub halted: bool,
    pub source: String,
    pub staleness_ms: u64,
}

impl Quote {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread_bps(&self) -> f64 {
        let mid = self.mid();
        if mid <= 0.0 {
            return 0.0;
        }
        (self.ask - self.bid) / mid * 10_000.0
    }

    /// Validates the quote invariants. Invalid quotes are dropped by the
    /// adapters, never returned to callers.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), QuoteError> {
        let fail = |reason: &str| {
            Err(QuoteError::InvalidQuote {
                symbol: self.symbol.clone(),
                reason: reason.to_string(),
            })
        };

        if self.bid <= 0.0 || self.ask <= 0.0 || self.last <= 0.0 {
            return fail("non-positive price");
        }
        if self.ask < self.bid {
            return fail("ask below bid");
        }
        if self.volume < 0.0 {
            return fail("negative volume");
        }
        if self.timestamp > now + Duration::minutes(5) {
            return fail("timestamp too far in the future");
        }
        Ok(())
    }
}

/// Per-symbol derived view consumed by the decision engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub symbol: String,
    pub halted: bool,
    pub last: f64,
    pub vwap_5m: f64,
    pub rel_volume: f64,
    pub premarket: bool,
    pub postmarket: bool,
    pub spread_bps: f64,
}

/// A single fused-score input. Created from news items and from the
/// trend heuristic (`last > vwap_5m`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advice {
    pub symbol: String,
    /// Sentiment score in [-1, 1].
    pub score: f64,
    /// Confidence in [0, 1]. Fusion floors this at 0.5.
    pub confidence: f64,
    /// Source weight in [0, inf).
    pub source_weight: f64,
    pub provider: String,
    pub is_press_release: bool,
    pub published_at: DateTime<Utc>,
}

impl Advice {
    /// Contribution of this advice to the pre-tanh fused sum.
    pub fn contribution(&self) -> f64 {
        self.score * self.confidence.max(0.5) * self.source_weight
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EarningsStatus {
    Confirmed,
    Estimated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarningsEvent {
    pub symbol: String,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
    pub status: EarningsStatus,
}
