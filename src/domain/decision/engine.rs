use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::decision::corroboration::{self, CorroborationConfig, CorroborationState};
use crate::domain::decision::earnings::{self, EarningsEmbargoState, EmbargoConfig};
use crate::domain::overrides::FrozenSymbol;
use crate::domain::ports::RiskHook;
use crate::domain::trading::types::Intent;
use crate::domain::types::{Advice, EarningsEvent, Features};

pub const GATE_GLOBAL_PAUSE: &str = "global_pause";
pub const GATE_HALT: &str = "halt";
pub const GATE_SESSION: &str = "session";
pub const GATE_LIQUIDITY: &str = "liquidity";
pub const GATE_FROZEN: &str = "frozen";
pub const GATE_CORROBORATION: &str = "corroboration";
pub const GATE_EARNINGS_EMBARGO: &str = "earnings_embargo";

/// Risk switches consulted on every evaluation.
#[derive(Debug, Clone, Default)]
pub struct RiskState {
    pub global_pause: bool,
    pub block_premarket: bool,
    pub block_postmarket: bool,
    pub max_spread_bps: f64,
    pub frozen_symbols: Vec<FrozenSymbol>,
}

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Fused-score threshold for BUY_1X.
    pub positive: f64,
    /// Fused-score threshold for BUY_5X.
    pub very_positive: f64,
    /// Notional for one BUY_1X.
    pub base_usd: f64,
    pub corroboration: CorroborationConfig,
    pub earnings_embargo: EmbargoConfig,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            positive: 0.35,
            very_positive: 0.65,
            base_usd: 2_000.0,
            corroboration: CorroborationConfig::default(),
            earnings_embargo: EmbargoConfig::default(),
        }
    }
}

/// One blocked gate in the decision reason. Hard gates force REJECT,
/// soft gates downgrade to HOLD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateEntry {
    pub gate: String,
    pub hard: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub what_would_change_it: Option<String>,
}

/// Machine-readable justification serialized into
/// `ProposedAction::reason_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reason {
    pub symbol: String,
    pub intent: Intent,
    pub fused_score: f64,
    pub advice_count: usize,
    pub pr_dropped: bool,
    pub gates_blocked: Vec<String>,
    pub gates: Vec<GateEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corroboration: Option<CorroborationState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earnings_embargo: Option<EarningsEmbargoState>,
}

#[derive(Debug, Clone)]
pub struct ProposedAction {
    pub symbol: String,
    pub intent: Intent,
    pub base_amount_usd: f64,
    pub scaled_notional: f64,
    pub fused_score: f64,
    pub reason_json: String,
}

fn fuse(advice: &[Advice], exclude_pr: bool) -> f64 {
    let sum: f64 = advice
        .iter()
        .filter(|a| !(exclude_pr && a.is_press_release))
        .map(|a| a.contribution())
        .sum();
    sum.tanh()
}

/// Evaluates one symbol. Deterministic and pure: all inputs are
/// snapshots, the clock is a parameter, and the result is always a
/// `ProposedAction` (hard gates mean REJECT, never an error).
#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    symbol: &str,
    advice: &[Advice],
    features: &Features,
    risk: &RiskState,
    cfg: &DecisionConfig,
    earnings_events: &[EarningsEvent],
    hooks: &[Arc<dyn RiskHook>],
    now: DateTime<Utc>,
) -> ProposedAction {
    // Advice published in the future has not arrived yet.
    let visible: Vec<Advice> = advice
        .iter()
        .filter(|a| a.published_at <= now)
        .cloned()
        .collect();

    let corroboration = corroboration::analyze(&visible, &cfg.corroboration, now);
    let embargo = earnings::analyze(symbol, earnings_events, &cfg.earnings_embargo, now);

    let pr_dropped = corroboration.state.required && corroboration.drop_pr;
    let fused_score = fuse(&visible, pr_dropped);

    // Gate collection. Every applicable gate is recorded; nothing
    // short-circuits, so the reason lists them all.
    let mut gates: Vec<GateEntry> = Vec::new();
    let hard = |gate: &str| GateEntry {
        gate: gate.to_string(),
        hard: true,
        what_would_change_it: None,
    };

    if risk.global_pause {
        gates.push(hard(GATE_GLOBAL_PAUSE));
    }
    if features.halted {
        gates.push(hard(GATE_HALT));
    }
    if (features.premarket && risk.block_premarket)
        || (features.postmarket && risk.block_postmarket)
    {
        gates.push(hard(GATE_SESSION));
    }
    if features.spread_bps > risk.max_spread_bps {
        gates.push(hard(GATE_LIQUIDITY));
    }
    if risk
        .frozen_symbols
        .iter()
        .any(|f| f.symbol.eq_ignore_ascii_case(symbol) && f.until_utc > now)
    {
        gates.push(hard(GATE_FROZEN));
    }

    if corroboration.state.required
        && !corroboration.drop_pr
        && corroboration.state.missing
        && fused_score >= cfg.positive
    {
        if let Some(until) = corroboration.state.until {
            if now <= until {
                gates.push(GateEntry {
                    gate: GATE_CORROBORATION.to_string(),
                    hard: false,
                    what_would_change_it: Some(format!(
                        "editorial/regulatory confirmation before {}",
                        until.to_rfc3339()
                    )),
                });
            }
        }
    }

    if embargo.active && fused_score >= cfg.positive {
        let lifts_at = embargo
            .window_end
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        gates.push(GateEntry {
            gate: GATE_EARNINGS_EMBARGO.to_string(),
            hard: false,
            what_would_change_it: Some(format!("wait until {}", lifts_at)),
        });
    }

    // Score-mapped candidate shown to the risk hooks.
    let candidate = if fused_score >= cfg.very_positive {
        Intent::Buy5x
    } else if fused_score >= cfg.positive {
        Intent::Buy1x
    } else {
        Intent::Hold
    };

    let mut size_multiplier = 1.0;
    for hook in hooks {
        let verdict = hook.evaluate(symbol, features, candidate);
        if let Some(gate) = verdict.gate {
            gates.push(GateEntry {
                gate,
                hard: true,
                what_would_change_it: None,
            });
        }
        if let Some(mult) = verdict.size_multiplier {
            size_multiplier *= mult;
        }
    }

    let any_hard = gates.iter().any(|g| g.hard);
    let any_soft = gates.iter().any(|g| !g.hard);

    let (intent, scaled_notional) = if any_hard {
        (Intent::Reject, 0.0)
    } else if any_soft {
        (Intent::Hold, 0.0)
    } else {
        match candidate {
            Intent::Buy5x => (Intent::Buy5x, 5.0 * cfg.base_usd * size_multiplier),
            Intent::Buy1x => (Intent::Buy1x, cfg.base_usd * size_multiplier),
            _ => (Intent::Hold, 0.0),
        }
    };

    let reason = Reason {
        symbol: symbol.to_string(),
        intent,
        fused_score,
        advice_count: visible.len(),
        pr_dropped,
        gates_blocked: gates.iter().map(|g| g.gate.clone()).collect(),
        gates,
        corroboration: corroboration
            .state
            .required
            .then_some(corroboration.state.clone()),
        earnings_embargo: embargo.active.then_some(embargo.clone()),
    };

    ProposedAction {
        symbol: symbol.to_string(),
        intent,
        base_amount_usd: cfg.base_usd,
        scaled_notional,
        fused_score,
        reason_json: serde_json::to_string(&reason).unwrap_or_else(|_| "{}".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::HookVerdict;

    fn features(symbol: &str) -> Features {
        Features {
            symbol: symbol.to_string(),
            halted: false,
            last: 207.0,
            vwap_5m: 205.0,
            rel_volume: 1.1,
            premarket: false,
            postmarket: false,
            spread_bps: 10.0,
        }
    }

    fn risk() -> RiskState {
        RiskState {
            global_pause: false,
            block_premarket: true,
            block_postmarket: true,
            max_spread_bps: 80.0,
            frozen_symbols: vec![],
        }
    }

    fn advice(symbol: &str, score: f64, confidence: f64, weight: f64) -> Advice {
        Advice {
            symbol: symbol.to_string(),
            score,
            confidence,
            source_weight: weight,
            provider: "newswire".to_string(),
            is_press_release: false,
            published_at: Utc::now() - chrono::Duration::minutes(1),
        }
    }

    #[test]
    fn test_fusion_is_order_invariant() {
        let now = Utc::now();
        let cfg = DecisionConfig::default();
        let mut set = vec![
            advice("AAPL", 0.6, 0.8, 1.0),
            advice("AAPL", -0.2, 0.9, 0.5),
            advice("AAPL", 0.3, 0.4, 2.0),
        ];

        let a = evaluate("AAPL", &set, &features("AAPL"), &risk(), &cfg, &[], &[], now);
        set.reverse();
        let b = evaluate("AAPL", &set, &features("AAPL"), &risk(), &cfg, &[], &[], now);

        assert!((a.fused_score - b.fused_score).abs() < 1e-12);
        assert_eq!(a.intent, b.intent);
    }

    #[test]
    fn test_score_thresholds_map_to_sizing() {
        let now = Utc::now();
        let cfg = DecisionConfig::default();
        let f = features("AAPL");

        // Below positive -> HOLD.
        let weak = evaluate(
            "AAPL",
            &[advice("AAPL", 0.1, 0.5, 1.0)],
            &f,
            &risk(),
            &cfg,
            &[],
            &[],
            now,
        );
        assert_eq!(weak.intent, Intent::Hold);
        assert_eq!(weak.scaled_notional, 0.0);

        // Above positive -> BUY_1X.
        let buy = evaluate(
            "AAPL",
            &[advice("AAPL", 0.6, 0.8, 1.0)],
            &f,
            &risk(),
            &cfg,
            &[],
            &[],
            now,
        );
        assert_eq!(buy.intent, Intent::Buy1x);
        assert_eq!(buy.scaled_notional, cfg.base_usd);

        // Above very_positive -> BUY_5X.
        let strong = evaluate(
            "AAPL",
            &[advice("AAPL", 0.9, 1.0, 2.0)],
            &f,
            &risk(),
            &cfg,
            &[],
            &[],
            now,
        );
        assert_eq!(strong.intent, Intent::Buy5x);
        assert_eq!(strong.scaled_notional, 5.0 * cfg.base_usd);
    }

    #[test]
    fn test_hard_gate_rejects_and_records_all_gates() {
        let now = Utc::now();
        let cfg = DecisionConfig::default();
        let mut f = features("AAPL");
        f.halted = true;
        let mut r = risk();
        r.global_pause = true;

        let action = evaluate(
            "AAPL",
            &[advice("AAPL", 0.9, 1.0, 2.0)],
            &f,
            &r,
            &cfg,
            &[],
            &[],
            now,
        );
        assert_eq!(action.intent, Intent::Reject);
        assert_eq!(action.scaled_notional, 0.0);

        let reason: Reason = serde_json::from_str(&action.reason_json).expect("reason parses");
        assert!(reason.gates_blocked.contains(&GATE_GLOBAL_PAUSE.to_string()));
        assert!(reason.gates_blocked.contains(&GATE_HALT.to_string()));
    }

    #[test]
    fn test_liquidity_gate() {
        let now = Utc::now();
        let cfg = DecisionConfig::default();
        let mut f = features("AAPL");
        f.spread_bps = 120.0;

        let action = evaluate(
            "AAPL",
            &[advice("AAPL", 0.6, 0.8, 1.0)],
            &f,
            &risk(),
            &cfg,
            &[],
            &[],
            now,
        );
        assert_eq!(action.intent, Intent::Reject);
        let reason: Reason = serde_json::from_str(&action.reason_json).expect("reason parses");
        assert!(reason.gates_blocked.contains(&GATE_LIQUIDITY.to_string()));
    }

    #[test]
    fn test_frozen_symbol_gate_respects_expiry() {
        let now = Utc::now();
        let cfg = DecisionConfig::default();
        let f = features("AAPL");
        let mut r = risk();
        r.frozen_symbols.push(FrozenSymbol {
            symbol: "AAPL".to_string(),
            until_utc: now - chrono::Duration::minutes(5),
        });

        // Expired freeze does not gate.
        let action = evaluate(
            "AAPL",
            &[advice("AAPL", 0.6, 0.8, 1.0)],
            &f,
            &r,
            &cfg,
            &[],
            &[],
            now,
        );
        assert_eq!(action.intent, Intent::Buy1x);

        r.frozen_symbols[0].until_utc = now + chrono::Duration::minutes(5);
        let action = evaluate(
            "AAPL",
            &[advice("AAPL", 0.6, 0.8, 1.0)],
            &f,
            &r,
            &cfg,
            &[],
            &[],
            now,
        );
        assert_eq!(action.intent, Intent::Reject);
    }

    struct VetoHook;

    impl RiskHook for VetoHook {
        fn name(&self) -> &str {
            "veto"
        }

        fn evaluate(&self, _symbol: &str, _features: &Features, _intent: Intent) -> HookVerdict {
            HookVerdict::veto("daily_trade_cap")
        }
    }

    struct HalfSizeHook;

    impl RiskHook for HalfSizeHook {
        fn name(&self) -> &str {
            "half_size"
        }

        fn evaluate(&self, _symbol: &str, _features: &Features, _intent: Intent) -> HookVerdict {
            HookVerdict::scale(0.5)
        }
    }

    #[test]
    fn test_hook_veto_appends_gate() {
        let now = Utc::now();
        let cfg = DecisionConfig::default();
        let hooks: Vec<Arc<dyn RiskHook>> = vec![Arc::new(VetoHook)];

        let action = evaluate(
            "AAPL",
            &[advice("AAPL", 0.6, 0.8, 1.0)],
            &features("AAPL"),
            &risk(),
            &cfg,
            &[],
            &hooks,
            now,
        );
        assert_eq!(action.intent, Intent::Reject);
        let reason: Reason = serde_json::from_str(&action.reason_json).expect("reason parses");
        assert!(reason.gates_blocked.contains(&"daily_trade_cap".to_string()));
    }

    #[test]
    fn test_hook_size_multiplier_scales_notional() {
        let now = Utc::now();
        let cfg = DecisionConfig::default();
        let hooks: Vec<Arc<dyn RiskHook>> = vec![Arc::new(HalfSizeHook)];

        let action = evaluate(
            "AAPL",
            &[advice("AAPL", 0.6, 0.8, 1.0)],
            &features("AAPL"),
            &risk(),
            &cfg,
            &[],
            &hooks,
            now,
        );
        assert_eq!(action.intent, Intent::Buy1x);
        assert!((action.scaled_notional - cfg.base_usd * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_future_advice_is_invisible() {
        let now = Utc::now();
        let cfg = DecisionConfig::default();
        let mut a = advice("AAPL", 0.9, 1.0, 2.0);
        a.published_at = now + chrono::Duration::minutes(10);

        let action = evaluate("AAPL", &[a], &features("AAPL"), &risk(), &cfg, &[], &[], now);
        assert_eq!(action.intent, Intent::Hold);
        assert_eq!(action.fused_score, 0.0);
    }
}
