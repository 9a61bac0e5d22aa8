use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Sized trade intent produced by the decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    #[serde(rename = "REJECT")]
    Reject,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "BUY_1X")]
    Buy1x,
    #[serde(rename = "BUY_5X")]
    Buy5x,
    #[serde(rename = "REDUCE")]
    Reduce,
}

impl Intent {
    /// Intents that the paper executor converts into orders.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Intent::Buy1x | Intent::Buy5x | Intent::Reduce)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Reject => write!(f, "REJECT"),
            Intent::Hold => write!(f, "HOLD"),
            Intent::Buy1x => write!(f, "BUY_1X"),
            Intent::Buy5x => write!(f, "BUY_5X"),
            Intent::Reduce => write!(f, "REDUCE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells. Used to apply slippage against the taker.
    pub fn sign(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub intent: Intent,
    pub timestamp: DateTime<Utc>,
    pub status: OrderStatus,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub quantity: f64,
    pub price: f64,
    pub side: OrderSide,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub slippage_bps: f64,
}

/// Stable fingerprint preventing duplicate orders within the dedupe
/// window. The score is formatted at fixed precision so floating noise
/// does not produce distinct keys for the same decision.
pub fn idempotency_key(symbol: &str, intent: Intent, epoch_seconds: i64, fused_score: f64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update(intent.to_string().as_bytes());
    hasher.update(epoch_seconds.to_string().as_bytes());
    hasher.update(format!("{:.6}", fused_score).as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}
