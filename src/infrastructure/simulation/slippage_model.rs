use rand::Rng;

use crate::domain::trading::types::OrderSide;

/// Trait defining a slippage simulation model.
pub trait SlippageModel: Send + Sync {
    /// Slippage for one fill, in basis points against the taker.
    fn next_slippage_bps(&self) -> f64;
}

/// Uniform slippage in `[min_bps, max_bps]`. Always adverse: buys fill
/// above the reference price, sells below.
#[derive(Debug, Clone)]
pub struct UniformSlippage {
    min_bps: f64,
    max_bps: f64,
}

impl UniformSlippage {
    pub fn new(min_bps: f64, max_bps: f64) -> Self {
        Self {
            min_bps: min_bps.min(max_bps),
            max_bps: max_bps.max(min_bps),
        }
    }
}

impl SlippageModel for UniformSlippage {
    fn next_slippage_bps(&self) -> f64 {
        if self.min_bps == self.max_bps {
            return self.min_bps;
        }
        let mut rng = rand::rng();
        rng.random_range(self.min_bps..=self.max_bps)
    }
}

/// No slippage (perfect execution) for tests.
pub struct ZeroSlippage;

impl SlippageModel for ZeroSlippage {
    fn next_slippage_bps(&self) -> f64 {
        0.0
    }
}

/// Applies signed slippage to the reference price:
/// `last * (1 + sign * bps / 10000)` with sign +1 for buys, -1 for sells.
pub fn fill_price(last: f64, side: OrderSide, slippage_bps: f64) -> f64 {
    last * (1.0 + side.sign() * slippage_bps / 10_000.0)
}
