use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::domain::errors::QuoteError;
use crate::domain::ports::QuotesAdapter;
use crate::domain::types::{Quote, Session};

pub const PROVIDER_NAME: &str = "mock";

/// Deterministic quote source used for symbols outside the live
/// allowlist, as the fallback of last resort, and as the reference side
/// of shadow comparisons.
///
/// Prices are a pure function of (symbol, minute bucket): the same
/// request in the same minute returns the same quote, which keeps shadow
/// comparisons and tests reproducible.
pub struct MockQuotesAdapter {
    spread_bps: f64,
}

impl MockQuotesAdapter {
    pub fn new() -> Self {
        Self { spread_bps: 8.0 }
    }

    pub fn with_spread_bps(spread_bps: f64) -> Self {
        Self { spread_bps }
    }

    fn symbol_seed(symbol: &str) -> u64 {
        symbol
            .bytes()
            .fold(1_469_598_103u64, |acc, b| {
                (acc ^ b as u64).wrapping_mul(1_099_511_628_211)
            })
    }

    fn build_quote(&self, symbol: &str) -> Quote {
        let seed = Self::symbol_seed(symbol);
        // Base price in [20, 520), stable per symbol.
        let base = 20.0 + (seed % 500) as f64;

        // Per-minute drift from a linear congruential step.
        let minute = (Utc::now().timestamp() / 60) as u64;
        let step = seed
            .wrapping_add(minute)
            .wrapping_mul(1_103_515_245)
            .wrapping_add(12_345);
        let drift = (((step / 65_536) % 1_000) as f64 / 1_000.0 - 0.5) * 0.01;

        let last = base * (1.0 + drift);
        let half_spread = last * self.spread_bps / 10_000.0 / 2.0;
        let volume = 10_000.0 + (step % 90_000) as f64;

        Quote {
            symbol: symbol.to_uppercase(),
            bid: last - half_spread,
            ask: last + half_spread,
            last,
            volume,
            timestamp: Utc::now(),
            session: Session::Rth,
            halted: false,
            source: PROVIDER_NAME.to_string(),
            staleness_ms: 0,
        }
    }
}

impl Default for MockQuotesAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuotesAdapter for MockQuotesAdapter {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        Ok(self.build_quote(symbol))
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError> {
        Ok(symbols.iter().map(|s| self.build_quote(s)).collect())
    }

    async fn health_check(&self) -> Result<(), QuoteError> {
        Ok(())
    }

    async fn close(&self) {
        info!("MockQuotesAdapter: Closed");
    }
}
