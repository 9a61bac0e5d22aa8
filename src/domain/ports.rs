use crate::domain::errors::QuoteError;
use crate::domain::trading::types::Intent;
use crate::domain::types::{Features, Quote};
use crate::domain::wire::WireEvent;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc::Receiver, watch};

/// Capability exposed by every quote source: the real provider adapters,
/// the deterministic mock, and the live adapter that composes them.
#[async_trait]
pub trait QuotesAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn get_quote(&self, symbol: &str) -> Result<Quote, QuoteError>;

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError>;

    async fn health_check(&self) -> Result<(), QuoteError>;

    async fn close(&self);
}

/// Streaming event source. `start` hands back the envelope channel; the
/// transport task ends when the stream is exhausted, the shutdown signal
/// flips, or an unrecoverable error remains after fallback.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn start(&self, shutdown: watch::Receiver<bool>) -> Result<Receiver<WireEvent>>;

    async fn close(&self);
}

/// Verdict from a risk hook. A hook may veto by naming a gate, and may
/// scale the notional; it never mutates the engine.
#[derive(Debug, Clone, Default)]
pub struct HookVerdict {
    pub gate: Option<String>,
    pub size_multiplier: Option<f64>,
}

impl HookVerdict {
    pub fn pass() -> Self {
        Self::default()
    }

    pub fn veto(gate: impl Into<String>) -> Self {
        Self {
            gate: Some(gate.into()),
            size_multiplier: None,
        }
    }

    pub fn scale(multiplier: f64) -> Self {
        Self {
            gate: None,
            size_multiplier: Some(multiplier),
        }
    }
}

/// Opaque risk-control hook consulted by the decision engine
/// (portfolio caps, stop-loss, sector limits, drawdown).
pub trait RiskHook: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, symbol: &str, features: &Features, intent: Intent) -> HookVerdict;
}
