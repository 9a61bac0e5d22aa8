use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

/// A symbol frozen until a given time. Entries whose `until_utc` has
/// elapsed are ignored at evaluation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenSymbol {
    pub symbol: String,
    pub until_utc: DateTime<Utc>,
}

/// Operator-controlled runtime overrides, hot-reloaded from a JSON file.
/// Versioning is monotone: only a strictly higher version is applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeOverrides {
    pub version: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub global_pause: Option<bool>,
    #[serde(default)]
    pub frozen_symbols: Vec<FrozenSymbol>,
}

impl RuntimeOverrides {
    /// Frozen symbols still in force at `now`.
    pub fn active_frozen(&self, now: DateTime<Utc>) -> Vec<FrozenSymbol> {
        self.frozen_symbols
            .iter()
            .filter(|f| f.until_utc > now)
            .cloned()
            .collect()
    }
}

/// Shared store with compare-and-swap apply semantics.
pub struct OverrideStore {
    current: Mutex<RuntimeOverrides>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(RuntimeOverrides::default()),
        }
    }

    /// Applies `candidate` iff its version is strictly higher than the
    /// current one. Returns whether it was applied.
    pub fn apply(&self, candidate: RuntimeOverrides) -> bool {
        let mut current = self.current.lock().expect("override lock poisoned");
        if candidate.version <= current.version {
            return false;
        }
        info!(
            "OverrideStore: Applying overrides v{} (pause={:?}, {} frozen symbols)",
            candidate.version,
            candidate.global_pause,
            candidate.frozen_symbols.len()
        );
        *current = candidate;
        true
    }

    pub fn current(&self) -> RuntimeOverrides {
        self.current.lock().expect("override lock poisoned").clone()
    }
}

impl Default for OverrideStore {
    fn default() -> Self {
        Self::new()
    }
}
