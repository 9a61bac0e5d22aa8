use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::domain::trading::types::{Fill, OrderSide};

/// Per-symbol position state. `entry_vwap` is the size-weighted running
/// average of BUY fill prices since the position was last flat.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
    pub entry_vwap: f64,
    pub last_trade_ts: Option<DateTime<Utc>>,
    pub trades_today: u32,
}

impl Position {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            qty: 0.0,
            entry_vwap: 0.0,
            last_trade_ts: None,
            trades_today: 0,
        }
    }
}

/// In-memory paper portfolio. Exclusively mutated by the fill handler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Portfolio {
    pub positions: HashMap<String, Position>,
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn trades_today(&self, symbol: &str) -> u32 {
        self.positions
            .get(symbol)
            .map(|p| p.trades_today)
            .unwrap_or(0)
    }

    /// Applies a fill. BUYs grow the position and re-weight `entry_vwap`;
    /// SELLs shrink it, clamped at zero. A position driven flat resets its
    /// entry VWAP so the next BUY starts a fresh average.
    pub fn apply_fill(&mut self, fill: &Fill) {
        let pos = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::new(&fill.symbol));

        match fill.side {
            OrderSide::Buy => {
                let new_qty = pos.qty + fill.quantity;
                if new_qty > 0.0 {
                    pos.entry_vwap =
                        (pos.qty * pos.entry_vwap + fill.quantity * fill.price) / new_qty;
                }
                pos.qty = new_qty;
            }
            OrderSide::Sell => {
                pos.qty = (pos.qty - fill.quantity).max(0.0);
                if pos.qty == 0.0 {
                    pos.entry_vwap = 0.0;
                }
            }
        }

        pos.last_trade_ts = Some(fill.timestamp);
        pos.trades_today += 1;
    }

    /// Notional market value across positions at the supplied prices.
    pub fn gross_exposure(&self, prices: &HashMap<String, f64>) -> f64 {
        self.positions
            .values()
            .map(|p| p.qty * prices.get(&p.symbol).copied().unwrap_or(p.entry_vwap))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(symbol: &str, side: OrderSide, qty: f64, price: f64) -> Fill {
        Fill {
            order_id: "o-1".to_string(),
            symbol: symbol.to_string(),
            quantity: qty,
            price,
            side,
            timestamp: Utc::now(),
            latency_ms: 50,
            slippage_bps: 2.0,
        }
    }

    #[test]
    fn test_buy_fills_weight_entry_vwap() {
        let mut portfolio = Portfolio::new();
        portfolio.apply_fill(&fill("AAPL", OrderSide::Buy, 1.0, 100.0));
        portfolio.apply_fill(&fill("AAPL", OrderSide::Buy, 3.0, 104.0));

        let pos = portfolio.position("AAPL").expect("position exists");
        assert_eq!(pos.qty, 4.0);
        // (1*100 + 3*104) / 4 = 103
        assert!((pos.entry_vwap - 103.0).abs() < 1e-9);
        assert_eq!(pos.trades_today, 2);
    }

    #[test]
    fn test_sell_clamps_at_zero() {
        let mut portfolio = Portfolio::new();
        portfolio.apply_fill(&fill("AAPL", OrderSide::Buy, 2.0, 100.0));
        portfolio.apply_fill(&fill("AAPL", OrderSide::Sell, 5.0, 99.0));

        let pos = portfolio.position("AAPL").expect("position exists");
        assert_eq!(pos.qty, 0.0);
    }

    #[test]
    fn test_flat_position_resets_entry_vwap() {
        let mut portfolio = Portfolio::new();
        portfolio.apply_fill(&fill("AAPL", OrderSide::Buy, 2.0, 100.0));
        portfolio.apply_fill(&fill("AAPL", OrderSide::Sell, 2.0, 110.0));
        portfolio.apply_fill(&fill("AAPL", OrderSide::Buy, 1.0, 50.0));

        let pos = portfolio.position("AAPL").expect("position exists");
        // Fresh average after going flat, not blended with the old basis.
        assert!((pos.entry_vwap - 50.0).abs() < 1e-9);
        assert_eq!(pos.qty, 1.0);
    }

    #[test]
    fn test_gross_exposure_uses_live_prices() {
        let mut portfolio = Portfolio::new();
        portfolio.apply_fill(&fill("AAPL", OrderSide::Buy, 2.0, 100.0));
        portfolio.apply_fill(&fill("MSFT", OrderSide::Buy, 1.0, 300.0));

        let mut prices = HashMap::new();
        prices.insert("AAPL".to_string(), 110.0);
        prices.insert("MSFT".to_string(), 310.0);

        assert!((portfolio.gross_exposure(&prices) - (220.0 + 310.0)).abs() < 1e-9);
    }
}
