use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::Advice;

const EDITORIAL_PROVIDERS: &[&str] = &["reuters", "ap", "bloomberg"];
const REGULATORY_PROVIDERS: &[&str] = &["sec", "edgar", "nasdaq", "nyse"];

/// Source classification for corroboration purposes. Only editorial and
/// regulatory sources can corroborate a press release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceClass {
    Pr,
    Editorial,
    Regulatory,
    Other,
}

pub fn classify(advice: &Advice) -> SourceClass {
    if advice.is_press_release {
        return SourceClass::Pr;
    }
    let provider = advice.provider.to_lowercase();
    if EDITORIAL_PROVIDERS.contains(&provider.as_str()) {
        SourceClass::Editorial
    } else if REGULATORY_PROVIDERS.contains(&provider.as_str()) {
        SourceClass::Regulatory
    } else {
        SourceClass::Other
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorroborationConfig {
    pub require_positive_pr: bool,
    pub window_seconds: i64,
}

impl Default for CorroborationConfig {
    fn default() -> Self {
        Self {
            require_positive_pr: true,
            window_seconds: 900,
        }
    }
}

/// Corroboration status included in the decision reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorroborationState {
    pub required: bool,
    pub until: Option<DateTime<Utc>>,
    pub seen: bool,
    pub missing: bool,
}

/// Full analysis outcome. `drop_pr` signals that fusion must be repeated
/// excluding press-release advice: the window expired, or the confirming
/// source arrived too late to count.
#[derive(Debug, Clone, Default)]
pub struct CorroborationAnalysis {
    pub state: CorroborationState,
    pub drop_pr: bool,
}

/// Decides whether the positive score is PR-driven and, if so, whether an
/// independent confirmation landed inside the window.
///
/// PR-driven means: positive PR contribution exists and makes up more
/// than half of all positive contribution weight.
pub fn analyze(
    advice: &[Advice],
    cfg: &CorroborationConfig,
    now: DateTime<Utc>,
) -> CorroborationAnalysis {
    if !cfg.require_positive_pr {
        return CorroborationAnalysis::default();
    }

    let mut pr_weight = 0.0;
    let mut total_positive_weight = 0.0;
    let mut earliest_pr: Option<DateTime<Utc>> = None;

    for a in advice {
        let c = a.contribution();
        if c <= 0.0 {
            continue;
        }
        total_positive_weight += c;
        if classify(a) == SourceClass::Pr {
            pr_weight += c;
            earliest_pr = Some(match earliest_pr {
                Some(t) => t.min(a.published_at),
                None => a.published_at,
            });
        }
    }

    let pr_driven =
        pr_weight > 0.0 && total_positive_weight > 0.0 && pr_weight / total_positive_weight > 0.5;
    if !pr_driven {
        return CorroborationAnalysis::default();
    }
    let Some(earliest) = earliest_pr else {
        return CorroborationAnalysis::default();
    };

    let until = earliest + Duration::seconds(cfg.window_seconds);

    let mut seen = false;
    let mut arrived_late = false;
    for a in advice {
        if a.contribution() <= 0.0 {
            continue;
        }
        match classify(a) {
            SourceClass::Editorial | SourceClass::Regulatory => {
                if a.published_at >= earliest && a.published_at < until {
                    seen = true;
                } else if a.published_at >= until {
                    arrived_late = true;
                }
            }
            _ => {}
        }
    }

    // Late confirmation never satisfies the window retroactively; the PR
    // is dropped from fusion instead, which also lifts the gate.
    let drop_pr = !seen && (now > until || arrived_late);

    CorroborationAnalysis {
        state: CorroborationState {
            required: true,
            until: Some(until),
            seen,
            missing: !seen,
        },
        drop_pr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advice(provider: &str, is_pr: bool, score: f64, published_at: DateTime<Utc>) -> Advice {
        Advice {
            symbol: "BIOX".to_string(),
            score,
            confidence: 0.8,
            source_weight: 1.0,
            provider: provider.to_string(),
            is_press_release: is_pr,
            published_at,
        }
    }

    #[test]
    fn test_classification() {
        let t = Utc::now();
        assert_eq!(classify(&advice("businesswire", true, 0.5, t)), SourceClass::Pr);
        assert_eq!(classify(&advice("reuters", false, 0.5, t)), SourceClass::Editorial);
        assert_eq!(classify(&advice("sec", false, 0.5, t)), SourceClass::Regulatory);
        assert_eq!(classify(&advice("blog", false, 0.5, t)), SourceClass::Other);
    }

    #[test]
    fn test_pr_dominant_score_requires_corroboration() {
        let t = Utc::now();
        let cfg = CorroborationConfig::default();
        let set = vec![advice("businesswire", true, 0.8, t)];

        let analysis = analyze(&set, &cfg, t + Duration::seconds(60));
        assert!(analysis.state.required);
        assert!(analysis.state.missing);
        assert!(!analysis.drop_pr);
        assert_eq!(analysis.state.until, Some(t + Duration::seconds(900)));
    }

    #[test]
    fn test_editorial_dominant_score_needs_no_corroboration() {
        let t = Utc::now();
        let cfg = CorroborationConfig::default();
        let set = vec![
            advice("businesswire", true, 0.2, t),
            advice("reuters", false, 0.9, t),
        ];

        let analysis = analyze(&set, &cfg, t + Duration::seconds(60));
        assert!(!analysis.state.required);
    }

    #[test]
    fn test_confirmation_inside_window_satisfies() {
        let t = Utc::now();
        let cfg = CorroborationConfig::default();
        let set = vec![
            advice("businesswire", true, 0.8, t),
            advice("reuters", false, 0.4, t + Duration::seconds(300)),
        ];

        let analysis = analyze(&set, &cfg, t + Duration::seconds(400));
        assert!(analysis.state.required);
        assert!(analysis.state.seen);
        assert!(!analysis.state.missing);
        assert!(!analysis.drop_pr);
    }

    #[test]
    fn test_late_confirmation_drops_pr() {
        let t = Utc::now();
        let cfg = CorroborationConfig::default();
        let set = vec![
            advice("businesswire", true, 0.8, t),
            advice("reuters", false, 0.4, t + Duration::seconds(1800)),
        ];

        let analysis = analyze(&set, &cfg, t + Duration::seconds(1900));
        assert!(analysis.state.required);
        assert!(analysis.state.missing);
        assert!(analysis.drop_pr);
    }

    #[test]
    fn test_expired_window_drops_pr_without_confirmation() {
        let t = Utc::now();
        let cfg = CorroborationConfig::default();
        let set = vec![advice("businesswire", true, 0.8, t)];

        let analysis = analyze(&set, &cfg, t + Duration::seconds(1200));
        assert!(analysis.drop_pr);
    }

    #[test]
    fn test_negative_pr_does_not_require_corroboration() {
        let t = Utc::now();
        let cfg = CorroborationConfig::default();
        let set = vec![advice("businesswire", true, -0.8, t)];

        let analysis = analyze(&set, &cfg, t + Duration::seconds(60));
        assert!(!analysis.state.required);
    }

    #[test]
    fn test_disabled_by_config() {
        let t = Utc::now();
        let cfg = CorroborationConfig {
            require_positive_pr: false,
            window_seconds: 900,
        };
        let set = vec![advice("businesswire", true, 0.8, t)];

        let analysis = analyze(&set, &cfg, t);
        assert!(!analysis.state.required);
    }
}
