use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::infrastructure::quotes::health::HealthState;

/// Thresholds a live rollout must clear before promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionThresholds {
    pub min_success_rate: f64,
    pub max_shadow_mismatch_rate: f64,
    pub max_budget_used_pct: f64,
    pub min_cache_hit_rate: f64,
}

impl Default for PromotionThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: 0.9,
            max_shadow_mismatch_rate: 0.05,
            max_budget_used_pct: 0.8,
            min_cache_hit_rate: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionGate {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Aggregated status plus the promotion-gate verdicts, serialized into
/// the oneshot summary and the state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionReport {
    pub health_state: HealthState,
    pub provider_circuits: HashMap<String, String>,
    pub success_rate: Option<f64>,
    pub shadow_mismatch_rate: Option<f64>,
    pub budget_used_pct: f64,
    pub cache_hit_rate: f64,
    pub p95_freshness_ms: f64,
    pub gates: Vec<PromotionGate>,
    pub promoted: bool,
}

pub struct PromotionInputs {
    pub health_state: HealthState,
    pub provider_circuits: HashMap<String, String>,
    pub success_rate: Option<f64>,
    pub shadow_samples: u64,
    pub shadow_mismatches: u64,
    pub budget_used_pct: f64,
    pub cache_hit_rate: f64,
    pub p95_freshness_ms: f64,
}

pub fn evaluate(inputs: PromotionInputs, thresholds: &PromotionThresholds) -> PromotionReport {
    let shadow_mismatch_rate = if inputs.shadow_samples > 0 {
        Some(inputs.shadow_mismatches as f64 / inputs.shadow_samples as f64)
    } else {
        None
    };

    let mut gates = Vec::new();

    gates.push(PromotionGate {
        name: "health".to_string(),
        passed: inputs.health_state != HealthState::Failed,
        detail: format!("health is {:?}", inputs.health_state),
    });

    gates.push(PromotionGate {
        name: "success_rate".to_string(),
        passed: inputs
            .success_rate
            .map(|r| r >= thresholds.min_success_rate)
            .unwrap_or(false),
        detail: match inputs.success_rate {
            Some(r) => format!("{:.3} vs minimum {:.3}", r, thresholds.min_success_rate),
            None => "insufficient samples".to_string(),
        },
    });

    gates.push(PromotionGate {
        name: "shadow_mismatch_rate".to_string(),
        // No samples means shadow mode has nothing to object to.
        passed: shadow_mismatch_rate
            .map(|r| r <= thresholds.max_shadow_mismatch_rate)
            .unwrap_or(true),
        detail: match shadow_mismatch_rate {
            Some(r) => format!("{:.3} vs maximum {:.3}", r, thresholds.max_shadow_mismatch_rate),
            None => "no shadow samples".to_string(),
        },
    });

    gates.push(PromotionGate {
        name: "budget_headroom".to_string(),
        passed: inputs.budget_used_pct <= thresholds.max_budget_used_pct,
        detail: format!(
            "{:.0}% used vs maximum {:.0}%",
            inputs.budget_used_pct * 100.0,
            thresholds.max_budget_used_pct * 100.0
        ),
    });

    gates.push(PromotionGate {
        name: "cache_hit_rate".to_string(),
        passed: inputs.cache_hit_rate >= thresholds.min_cache_hit_rate,
        detail: format!(
            "{:.3} vs minimum {:.3}",
            inputs.cache_hit_rate, thresholds.min_cache_hit_rate
        ),
    });

    let promoted = gates.iter().all(|g| g.passed);

    PromotionReport {
        health_state: inputs.health_state,
        provider_circuits: inputs.provider_circuits,
        success_rate: inputs.success_rate,
        shadow_mismatch_rate,
        budget_used_pct: inputs.budget_used_pct,
        cache_hit_rate: inputs.cache_hit_rate,
        p95_freshness_ms: inputs.p95_freshness_ms,
        gates,
        promoted,
    }
}
