use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::QuoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorporateActionKind {
    Split,
    ReverseSplit,
    Rename,
    Acquisition,
    Spinoff,
    Delisting,
    Halt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorporateAction {
    #[serde(rename = "type")]
    pub kind: CorporateActionKind,
    pub effective_date: DateTime<Utc>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub new_symbol: Option<String>,
    #[serde(default)]
    pub ratio: Option<f64>,
}

impl CorporateAction {
    /// An action applies from its effective date until its expiration
    /// date, or forever when no expiration is set.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if now < self.effective_date {
            return false;
        }
        match self.expiration_date {
            Some(exp) => now < exp,
            None => true,
        }
    }
}

/// Outcome of resolving a canonical symbol through the corporate-action
/// overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolResolution {
    pub symbol: String,
    /// Applied to quoted prices for split/reverse-split adjustments.
    pub price_multiplier: f64,
}

/// Canonicalizes symbols across providers and applies the
/// corporate-action overlay.
///
/// The per-provider maps are bidirectional: `normalize` goes
/// provider-form to canonical, `denormalize` goes back.
pub struct SymbolNormalizer {
    to_canonical: HashMap<String, HashMap<String, String>>,
    from_canonical: HashMap<String, HashMap<String, String>>,
    actions: HashMap<String, CorporateAction>,
}

impl SymbolNormalizer {
    pub fn new() -> Self {
        Self {
            to_canonical: HashMap::new(),
            from_canonical: HashMap::new(),
            actions: HashMap::new(),
        }
    }

    /// Registers a provider-specific alias for a canonical symbol.
    pub fn add_mapping(&mut self, provider: &str, provider_symbol: &str, canonical: &str) {
        self.to_canonical
            .entry(provider.to_string())
            .or_default()
            .insert(provider_symbol.to_string(), canonical.to_string());
        self.from_canonical
            .entry(provider.to_string())
            .or_default()
            .insert(canonical.to_string(), provider_symbol.to_string());
    }

    pub fn set_action(&mut self, symbol: &str, action: CorporateAction) {
        self.actions.insert(symbol.to_uppercase(), action);
    }

    /// Canonical form for a provider symbol. Unmapped symbols pass
    /// through uppercased.
    pub fn normalize(&self, provider: &str, provider_symbol: &str) -> String {
        self.to_canonical
            .get(provider)
            .and_then(|m| m.get(provider_symbol))
            .cloned()
            .unwrap_or_else(|| provider_symbol.to_uppercase())
    }

    /// Provider form for a canonical symbol. Unmapped symbols pass
    /// through unchanged.
    pub fn denormalize(&self, provider: &str, canonical: &str) -> String {
        self.from_canonical
            .get(provider)
            .and_then(|m| m.get(canonical))
            .cloned()
            .unwrap_or_else(|| canonical.to_string())
    }

    /// Applies the active corporate action, if any: renames substitute the
    /// new symbol, delistings and acquisitions reject the symbol, splits
    /// pass through with a price multiplier.
    pub fn resolve(&self, canonical: &str, now: DateTime<Utc>) -> Result<SymbolResolution, QuoteError> {
        let key = canonical.to_uppercase();
        let Some(action) = self.actions.get(&key).filter(|a| a.is_active(now)) else {
            return Ok(SymbolResolution {
                symbol: key,
                price_multiplier: 1.0,
            });
        };

        match action.kind {
            CorporateActionKind::Rename => {
                let new_symbol = action.new_symbol.clone().ok_or_else(|| {
                    QuoteError::InvalidSymbol {
                        symbol: key.clone(),
                        reason: "rename action without new_symbol".to_string(),
                    }
                })?;
                Ok(SymbolResolution {
                    symbol: new_symbol,
                    price_multiplier: 1.0,
                })
            }
            CorporateActionKind::Delisting => Err(QuoteError::InvalidSymbol {
                symbol: key,
                reason: "symbol is delisted".to_string(),
            }),
            CorporateActionKind::Acquisition => Err(QuoteError::InvalidSymbol {
                symbol: key,
                reason: "symbol was acquired".to_string(),
            }),
            CorporateActionKind::Split | CorporateActionKind::ReverseSplit => {
                Ok(SymbolResolution {
                    symbol: key,
                    price_multiplier: action.ratio.unwrap_or(1.0),
                })
            }
            CorporateActionKind::Spinoff | CorporateActionKind::Halt => Ok(SymbolResolution {
                symbol: key,
                price_multiplier: 1.0,
            }),
        }
    }
}

impl Default for SymbolNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn action(kind: CorporateActionKind) -> CorporateAction {
        CorporateAction {
            kind,
            effective_date: Utc::now() - Duration::days(1),
            expiration_date: None,
            new_symbol: None,
            ratio: None,
        }
    }

    #[test]
    fn test_normalize_denormalize_roundtrip() {
        let mut norm = SymbolNormalizer::new();
        norm.add_mapping("polygon", "BRK.B", "BRK-B");
        norm.add_mapping("polygon", "X:AAPL", "AAPL");

        for canonical in ["BRK-B", "AAPL"] {
            let provider_form = norm.denormalize("polygon", canonical);
            assert_eq!(norm.normalize("polygon", &provider_form), canonical);
        }
    }

    #[test]
    fn test_unmapped_symbol_passes_through_uppercased() {
        let norm = SymbolNormalizer::new();
        assert_eq!(norm.normalize("polygon", "msft"), "MSFT");
    }

    #[test]
    fn test_rename_substitutes_new_symbol() {
        let mut norm = SymbolNormalizer::new();
        let mut a = action(CorporateActionKind::Rename);
        a.new_symbol = Some("META".to_string());
        norm.set_action("FB", a);

        let resolved = norm.resolve("FB", Utc::now()).expect("resolvable");
        assert_eq!(resolved.symbol, "META");
    }

    #[test]
    fn test_delisting_rejects_symbol() {
        let mut norm = SymbolNormalizer::new();
        norm.set_action("TWTR", action(CorporateActionKind::Delisting));
        assert!(norm.resolve("TWTR", Utc::now()).is_err());
    }

    #[test]
    fn test_split_annotates_price_multiplier() {
        let mut norm = SymbolNormalizer::new();
        let mut a = action(CorporateActionKind::Split);
        a.ratio = Some(4.0);
        norm.set_action("NVDA", a);

        let resolved = norm.resolve("NVDA", Utc::now()).expect("resolvable");
        assert_eq!(resolved.symbol, "NVDA");
        assert_eq!(resolved.price_multiplier, 4.0);
    }

    #[test]
    fn test_expired_action_is_ignored() {
        let mut norm = SymbolNormalizer::new();
        let mut a = action(CorporateActionKind::Delisting);
        a.effective_date = Utc::now() - Duration::days(10);
        a.expiration_date = Some(Utc::now() - Duration::days(5));
        norm.set_action("OLD", a);

        assert!(norm.resolve("OLD", Utc::now()).is_ok());
    }
}
