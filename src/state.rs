use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A reply that was sent but whose message has not been marked yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub replied_at: DateTime<Utc>,
    pub sent_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    replied: BTreeMap<String, LedgerEntry>,
}

/// Persisted set of messages already replied to
///
/// An ID is recorded right after the reply is sent and cleared once the
/// marker label is applied. Anything left over after a crash is marked on
/// the next cycle without sending a second reply.
#[derive(Debug)]
pub struct ReplyLedger {
    path: Option<PathBuf>,
    entries: BTreeMap<String, LedgerEntry>,
}

impl ReplyLedger {
    /// Ledger that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
        }
    }

    /// Load from disk; a missing or unreadable file starts an empty ledger
    pub async fn load(path: &Path) -> Result<Self> {
        let mut ledger = Self {
            path: Some(path.to_path_buf()),
            entries: BTreeMap::new(),
        };

        if !path.exists() {
            tracing::info!("No existing reply ledger found, starting fresh");
            return Ok(ledger);
        }

        let json = tokio::fs::read_to_string(path).await?;
        match serde_json::from_str::<LedgerFile>(&json) {
            Ok(file) => {
                ledger.entries = file.replied;
                tracing::info!(
                    "Loaded reply ledger: {} pending entries from {:?}",
                    ledger.entries.len(),
                    path
                );
            }
            Err(e) => {
                tracing::warn!("Reply ledger {:?} is corrupt ({}), starting fresh", path, e);
            }
        }

        Ok(ledger)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.contains_key(message_id)
    }

    pub fn get(&self, message_id: &str) -> Option<&LedgerEntry> {
        self.entries.get(message_id)
    }

    /// Record a sent reply and persist
    pub async fn record_reply(&mut self, message_id: &str, sent_id: &str) -> Result<()> {
        self.entries.insert(
            message_id.to_string(),
            LedgerEntry {
                replied_at: Utc::now(),
                sent_id: sent_id.to_string(),
            },
        );
        self.save().await
    }

    /// Drop an entry once its message is marked; no-op if absent
    pub async fn clear(&mut self, message_id: &str) -> Result<()> {
        if self.entries.remove(message_id).is_some() {
            self.save().await?;
        }
        Ok(())
    }

    /// Save to disk
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = LedgerFile {
            replied: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(path, json).await?;
        tracing::debug!("Saved reply ledger to {:?}", path);
        Ok(())
    }
}
