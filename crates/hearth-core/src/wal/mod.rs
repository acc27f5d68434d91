//! Write-ahead log for the write pipeline (§3.3, §4.5 step 6-8).
//!
//! Loosely grounded in the `WalEntry`/`WalOperation` shape of
//! `toka-store-core`, but simplified to this engine's single-writer model:
//! no transactions, no async trait, just a synchronous append-only
//! JSON-lines file that is fsynced after every write and cleared once the
//! Fact Store commit it describes has landed.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{lock_poisoned, Result};
use crate::fact::Fact;

/// A single pending write, persisted before it is applied to the Fact
/// Store and vector index (§3.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub entry_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: WalOperation,
}

/// The write being logged. `Store`/`Update` carry the full fact, plus the
/// pre-computed embedding if one was produced before the crash, so recovery
/// can re-apply both the Fact Store row and the vector-index entry without
/// re-running classification or calling out to an embedding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WalOperation {
    Store { fact: Box<Fact>, embedding: Option<Vec<f32>> },
    Update { fact: Box<Fact>, embedding: Option<Vec<f32>> },
    Delete { id: String },
}

impl WalOperation {
    fn fact_id(&self) -> &str {
        match self {
            WalOperation::Store { fact, .. } | WalOperation::Update { fact, .. } => &fact.id,
            WalOperation::Delete { id } => id,
        }
    }
}

/// Append-only durability log backing the write pipeline.
pub struct Wal {
    path: PathBuf,
    file: Mutex<File>,
    max_age: Duration,
    max_bytes: u64,
}

impl Wal {
    /// Open (creating if absent) the WAL file at `path`.
    pub fn open(path: &Path, max_age: Duration, max_bytes: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            max_age,
            max_bytes,
        })
    }

    /// Append `entry` and fsync before returning, so a crash after this
    /// call still finds the entry on recovery (§3.3: "fsync after append").
    pub fn append(&self, entry: &WalEntry) -> Result<()> {
        let line = serde_json::to_string(entry)
            .map_err(|e| crate::error::EngineError::Corruption {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        let mut file = self.file.lock().map_err(|_| lock_poisoned("wal file"))?;
        writeln!(file, "{line}")?;
        file.sync_data()?;
        Ok(())
    }

    /// Truncate the log once its entries have been durably applied
    /// (§4.5 step 8: "WAL entry cleared on successful commit").
    pub fn clear(&self) -> Result<()> {
        let mut file = self.file.lock().map_err(|_| lock_poisoned("wal file"))?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Current size of the WAL file in bytes.
    pub fn size_bytes(&self) -> Result<u64> {
        let file = self.file.lock().map_err(|_| lock_poisoned("wal file"))?;
        Ok(file.metadata()?.len())
    }

    /// Whether the log has grown past the compaction threshold (§5).
    pub fn needs_compaction(&self) -> Result<bool> {
        Ok(self.size_bytes()? > self.max_bytes)
    }

    /// Read every entry still in the log, in append order.
    fn read_all(&self) -> Result<Vec<WalEntry>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping corrupt WAL line during recovery");
                }
            }
        }
        Ok(entries)
    }

    /// Replay the log on startup (§3.3, §4.7 "on startup"): entries older
    /// than `max_age` are discarded as stale (the write they describe is
    /// presumed superseded by a later, successfully committed write), and
    /// the rest are returned for re-application. The caller is responsible
    /// for idempotently re-committing each entry and then calling
    /// [`Wal::clear`].
    pub fn recover(&self, now: DateTime<Utc>) -> Result<Vec<WalEntry>> {
        let all = self.read_all()?;
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::zero());
        let mut fresh = Vec::new();
        let mut stale = 0usize;
        for entry in all {
            if now - entry.timestamp > max_age {
                stale += 1;
                continue;
            }
            fresh.push(entry);
        }
        if stale > 0 {
            tracing::info!(discarded = stale, "discarded stale WAL entries on recovery");
        }
        Ok(fresh)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn store_entry(fact: &Fact, embedding: Option<Vec<f32>>, now: DateTime<Utc>) -> WalEntry {
    WalEntry {
        entry_id: Uuid::new_v4(),
        timestamp: now,
        operation: WalOperation::Store { fact: Box::new(fact.clone()), embedding },
    }
}

pub fn update_entry(fact: &Fact, embedding: Option<Vec<f32>>, now: DateTime<Utc>) -> WalEntry {
    WalEntry {
        entry_id: Uuid::new_v4(),
        timestamp: now,
        operation: WalOperation::Update { fact: Box::new(fact.clone()), embedding },
    }
}

pub fn delete_entry(id: &str, now: DateTime<Utc>) -> WalEntry {
    WalEntry {
        entry_id: Uuid::new_v4(),
        timestamp: now,
        operation: WalOperation::Delete { id: id.to_string() },
    }
}
