use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::infrastructure::quotes::budget::ProviderSpend;
use crate::infrastructure::quotes::health::HealthState;

pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsecutiveStats {
    pub breaches: u32,
    pub oks: u32,
}

/// Periodic persistence of live-adapter operating state, written via
/// atomic rename so readers never observe a torn file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterStateSnapshot {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    pub health_state: HealthState,
    pub budget_state: HashMap<String, ProviderSpend>,
    pub cache_metrics: CacheMetricsSnapshot,
    pub consecutive_stats: ConsecutiveStats,
}

impl AdapterStateSnapshot {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create snapshot dir {}", parent.display()))?;
        }

        let tmp = path.with_extension("tmp");
        let body = serde_json::to_string_pretty(self).context("Failed to serialize snapshot")?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("Failed to write snapshot {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move snapshot into place at {}", path.display()))?;
        Ok(())
    }

    /// Best-effort load. A missing or unreadable snapshot is a cold
    /// start, not an error.
    pub fn load(path: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Self>(&raw) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => {
                info!(
                    "AdapterStateSnapshot: Restored state from {} (health {:?})",
                    path.display(),
                    snapshot.health_state
                );
                Some(snapshot)
            }
            Ok(snapshot) => {
                warn!(
                    "AdapterStateSnapshot: Ignoring snapshot with version {} (expected {})",
                    snapshot.version, SNAPSHOT_VERSION
                );
                None
            }
            Err(e) => {
                warn!(
                    "AdapterStateSnapshot: Ignoring unreadable snapshot {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }
}
