use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::domain::errors::OutboxError;
use crate::domain::trading::types::{Fill, Order};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryKind {
    Order,
    Fill,
}

/// One newline-delimited ledger line: `{type, data, event}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerLine {
    #[serde(rename = "type")]
    pub kind: LedgerEntryKind,
    pub data: serde_json::Value,
    pub event: DateTime<Utc>,
}

/// Append-only paper-trading ledger. The outbox exclusively owns the
/// file; appends are serialized through one writer lock so newline
/// boundaries are preserved.
pub struct Outbox {
    path: PathBuf,
    file: Mutex<File>,
}

impl Outbox {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OutboxError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| OutboxError::Open {
                    path: path.display().to_string(),
                    source,
                })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| OutboxError::Open {
                path: path.display().to_string(),
                source,
            })?;

        info!("Outbox: Ledger open at {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &LedgerLine) -> Result<(), OutboxError> {
        let mut body =
            serde_json::to_string(line).map_err(|source| OutboxError::Serialize { source })?;
        body.push('\n');

        let mut file = self.file.lock().expect("outbox lock poisoned");
        file.write_all(body.as_bytes())
            .map_err(|source| OutboxError::Append { source })?;
        file.flush().map_err(|source| OutboxError::Append { source })
    }

    pub fn append_order(&self, order: &Order) -> Result<(), OutboxError> {
        self.append(&LedgerLine {
            kind: LedgerEntryKind::Order,
            data: serde_json::to_value(order)
                .map_err(|source| OutboxError::Serialize { source })?,
            event: order.timestamp,
        })
    }

    pub fn append_fill(&self, fill: &Fill) -> Result<(), OutboxError> {
        self.append(&LedgerLine {
            kind: LedgerEntryKind::Fill,
            data: serde_json::to_value(fill)
                .map_err(|source| OutboxError::Serialize { source })?,
            event: fill.timestamp,
        })
    }

    /// Scans the ledger for an order with this idempotency key inside the
    /// dedupe window. Malformed lines (for example a torn final write
    /// from a crash) are skipped, not fatal.
    pub fn has_recent_order(
        &self,
        idempotency_key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxError> {
        let _guard = self.file.lock().expect("outbox lock poisoned");

        let file = File::open(&self.path).map_err(|source| OutboxError::Open {
            path: self.path.display().to_string(),
            source,
        })?;

        let cutoff = now - window;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| OutboxError::Append { source })?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: LedgerLine = match serde_json::from_str(&line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Outbox: Skipping malformed ledger line: {}", e);
                    continue;
                }
            };
            if parsed.kind != LedgerEntryKind::Order || parsed.event < cutoff {
                continue;
            }
            if parsed
                .data
                .get("idempotency_key")
                .and_then(|v| v.as_str())
                .is_some_and(|k| k == idempotency_key)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Reads every parseable line; used by tests and the oneshot summary.
    pub fn read_entries(path: &Path) -> Result<Vec<LedgerLine>, OutboxError> {
        let file = File::open(path).map_err(|source| OutboxError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| OutboxError::Append { source })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerLine>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Outbox: Skipping malformed ledger line: {}", e),
            }
        }
        Ok(entries)
    }
}
