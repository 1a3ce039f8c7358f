// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message Store (spec §4.D): a per-target append-only JSON log, capped at
//! 1000 entries, with atomic write-temp-then-replace persistence.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

use crate::model::{MessageEnvelope, StoredLog, Target};

/// Durable per-target envelope logs under `<root>/messages/`.
#[derive(Clone)]
pub struct MessageStore {
    root: PathBuf,
}

impl MessageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn file_for(&self, target: &Target) -> PathBuf {
        self.root.join(format!("{}_{}.json", target.session(), target.window()))
    }

    /// Append `envelope` to `target`'s log, trimming to the last 1000
    /// entries and writing atomically (write-temp-then-replace). A corrupt
    /// existing file is treated as empty and overwritten by this write.
    pub async fn append(&self, target: &Target, envelope: MessageEnvelope) -> Result<(), std::io::Error> {
        let path = self.file_for(target);
        let mut log = self.read_log(&path).await;
        log.push_capped(envelope);
        self.write_atomic(&path, &log).await
    }

    /// Read the full stored log for `target`. A missing file reads as
    /// empty; a corrupt file reads as empty with a logged warning.
    pub async fn read(&self, target: &Target) -> Vec<MessageEnvelope> {
        let path = self.file_for(target);
        self.read_log(&path).await.envelopes
    }

    async fn read_log(&self, path: &Path) -> StoredLog {
        match fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<MessageEnvelope>>(&bytes) {
                Ok(envelopes) => StoredLog { envelopes },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt message store file; treating as empty");
                    StoredLog::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredLog::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read message store file; treating as empty");
                StoredLog::default()
            }
        }
    }

    async fn write_atomic(&self, path: &Path, log: &StoredLog) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&log.envelopes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, body).await?;
        fs::rename(&tmp_path, path).await
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
