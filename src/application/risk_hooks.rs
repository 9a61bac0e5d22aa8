use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::warn;

use crate::config::RiskControlsSection;
use crate::domain::ports::{HookVerdict, RiskHook};
use crate::domain::trading::portfolio::Portfolio;
use crate::domain::trading::types::Intent;
use crate::domain::types::Features;

pub const GATE_DAILY_TRADE_CAP: &str = "daily_trade_cap";
pub const GATE_STOP_LOSS: &str = "stop_loss_active";
pub const GATE_SECTOR_LIMIT: &str = "sector_limit";
pub const GATE_DRAWDOWN: &str = "drawdown";

fn is_buy(intent: Intent) -> bool {
    matches!(intent, Intent::Buy1x | Intent::Buy5x)
}

/// Caps the number of trades per symbol per day.
pub struct DailyTradeCapHook {
    portfolio: Arc<RwLock<Portfolio>>,
    max_trades_per_symbol_per_day: u32,
}

impl DailyTradeCapHook {
    pub fn new(portfolio: Arc<RwLock<Portfolio>>, max_trades_per_symbol_per_day: u32) -> Self {
        Self {
            portfolio,
            max_trades_per_symbol_per_day,
        }
    }
}

impl RiskHook for DailyTradeCapHook {
    fn name(&self) -> &str {
        "daily_trade_cap"
    }

    fn evaluate(&self, symbol: &str, _features: &Features, intent: Intent) -> HookVerdict {
        if !is_buy(intent) {
            return HookVerdict::pass();
        }
        let trades = self
            .portfolio
            .read()
            .expect("portfolio lock poisoned")
            .trades_today(symbol);
        if trades >= self.max_trades_per_symbol_per_day {
            return HookVerdict::veto(GATE_DAILY_TRADE_CAP);
        }
        HookVerdict::pass()
    }
}

/// Vetoes new buys while the position trades below its stop level.
pub struct StopLossHook {
    portfolio: Arc<RwLock<Portfolio>>,
    stop_loss_pct: f64,
}

impl StopLossHook {
    pub fn new(portfolio: Arc<RwLock<Portfolio>>, stop_loss_pct: f64) -> Self {
        Self {
            portfolio,
            stop_loss_pct,
        }
    }
}

impl RiskHook for StopLossHook {
    fn name(&self) -> &str {
        "stop_loss"
    }

    fn evaluate(&self, symbol: &str, features: &Features, intent: Intent) -> HookVerdict {
        if !is_buy(intent) {
            return HookVerdict::pass();
        }
        let portfolio = self.portfolio.read().expect("portfolio lock poisoned");
        let Some(position) = portfolio.position(symbol) else {
            return HookVerdict::pass();
        };
        if position.qty <= 0.0 || position.entry_vwap <= 0.0 {
            return HookVerdict::pass();
        }
        let stop_level = position.entry_vwap * (1.0 - self.stop_loss_pct);
        if features.last < stop_level {
            warn!(
                "StopLossHook: {} trading at {:.2} below stop {:.2}, vetoing new buys",
                symbol, features.last, stop_level
            );
            return HookVerdict::veto(GATE_STOP_LOSS);
        }
        HookVerdict::pass()
    }
}

/// Caps exposure share per sector, using the configured symbol->sector
/// map. Symbols without a sector mapping are unconstrained.
pub struct SectorLimitHook {
    portfolio: Arc<RwLock<Portfolio>>,
    sector_map: HashMap<String, String>,
    max_sector_exposure_pct: f64,
}

impl SectorLimitHook {
    pub fn new(portfolio: Arc<RwLock<Portfolio>>, cfg: &RiskControlsSection) -> Self {
        Self {
            portfolio,
            sector_map: cfg.sector_map.clone(),
            max_sector_exposure_pct: cfg.max_sector_exposure_pct,
        }
    }
}

impl RiskHook for SectorLimitHook {
    fn name(&self) -> &str {
        "sector_limit"
    }

    fn evaluate(&self, symbol: &str, _features: &Features, intent: Intent) -> HookVerdict {
        if !is_buy(intent) {
            return HookVerdict::pass();
        }
        let Some(sector) = self.sector_map.get(symbol) else {
            return HookVerdict::pass();
        };

        let portfolio = self.portfolio.read().expect("portfolio lock poisoned");
        let mut sector_notional = 0.0;
        let mut total_notional = 0.0;
        for position in portfolio.positions.values() {
            let notional = position.qty * position.entry_vwap;
            total_notional += notional;
            if self.sector_map.get(&position.symbol) == Some(sector) {
                sector_notional += notional;
            }
        }

        if total_notional > 0.0 && sector_notional / total_notional > self.max_sector_exposure_pct {
            return HookVerdict::veto(GATE_SECTOR_LIMIT);
        }
        HookVerdict::pass()
    }
}

/// Watches equity drawdown from its high-water mark. Past half the limit
/// it halves new-buy sizing; past the limit it vetoes buys outright.
pub struct DrawdownHook {
    max_drawdown_pct: f64,
    state: Mutex<DrawdownState>,
}

#[derive(Default)]
struct DrawdownState {
    high_water: f64,
    current: f64,
}

impl DrawdownHook {
    pub fn new(max_drawdown_pct: f64) -> Self {
        Self {
            max_drawdown_pct,
            state: Mutex::new(DrawdownState::default()),
        }
    }

    /// Equity observations come from the portfolio refresh ticker.
    pub fn observe_equity(&self, equity: f64) {
        let mut state = self.state.lock().expect("drawdown lock poisoned");
        state.current = equity;
        if equity > state.high_water {
            state.high_water = equity;
        }
    }

    fn drawdown(&self) -> f64 {
        let state = self.state.lock().expect("drawdown lock poisoned");
        if state.high_water <= 0.0 {
            return 0.0;
        }
        ((state.high_water - state.current) / state.high_water).max(0.0)
    }
}

impl RiskHook for DrawdownHook {
    fn name(&self) -> &str {
        "drawdown"
    }

    fn evaluate(&self, _symbol: &str, _features: &Features, intent: Intent) -> HookVerdict {
        if !is_buy(intent) {
            return HookVerdict::pass();
        }
        let drawdown = self.drawdown();
        if drawdown > self.max_drawdown_pct {
            return HookVerdict::veto(GATE_DRAWDOWN);
        }
        if drawdown > self.max_drawdown_pct / 2.0 {
            return HookVerdict::scale(0.5);
        }
        HookVerdict::pass()
    }
}

/// Standard hook set wired by the application.
pub fn build_hooks(
    portfolio: Arc<RwLock<Portfolio>>,
    cfg: &RiskControlsSection,
    drawdown: Arc<DrawdownHook>,
) -> Vec<Arc<dyn RiskHook>> {
    vec![
        Arc::new(DailyTradeCapHook::new(
            Arc::clone(&portfolio),
            cfg.max_trades_per_symbol_per_day,
        )),
        Arc::new(StopLossHook::new(Arc::clone(&portfolio), cfg.stop_loss_pct)),
        Arc::new(SectorLimitHook::new(Arc::clone(&portfolio), cfg)),
        drawdown,
    ]
}
