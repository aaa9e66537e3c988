//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Dead-letter queue storage and hand-off
//!
//! Batches a stage could not process or forward are annotated and pushed to
//! the DLQ stage, which persists them for inspection and replay. Stores are
//! idempotent on `batch_id`: a duplicate hand-off (e.g. under replay)
//! replaces the entry instead of duplicating it.

pub mod replay;
pub mod stage;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use fblock_core::{ChainError, ChainResult, ErrorCode, MetricBatch, StageMetrics};

use crate::forwarder::{ChainPush, PushOutcome};

// Re-export commonly used types
pub use replay::{ReplayConfig, ReplayDriver, ReplayReport};
pub use stage::DlqStage;

/// One dead-lettered batch.
///
/// The entry is immutable once stored; replay bookkeeping lives with the
/// replay driver, never in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// The batch exactly as handed off, annotations included.
    pub batch: MetricBatch,

    /// When the DLQ stage persisted the entry.
    pub stored_at: DateTime<Utc>,
}

impl DlqEntry {
    pub fn new(batch: MetricBatch) -> Self {
        Self {
            batch,
            stored_at: Utc::now(),
        }
    }
}

/// Persistence behind the DLQ stage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Persist an entry, replacing any previous entry with the same batch id.
    async fn store(&self, entry: DlqEntry) -> ChainResult<()>;

    /// Look up one entry by batch id.
    async fn fetch(&self, batch_id: &str) -> ChainResult<Option<DlqEntry>>;

    /// Delete one entry; returns whether it existed.
    async fn remove(&self, batch_id: &str) -> ChainResult<bool>;

    /// All entries, oldest first.
    async fn scan(&self) -> ChainResult<Vec<DlqEntry>>;

    /// Number of stored entries.
    async fn len(&self) -> ChainResult<usize>;

    async fn is_empty(&self) -> ChainResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// In-memory store for tests and small deployments.
#[derive(Default)]
pub struct MemoryDlqStore {
    entries: Mutex<Vec<DlqEntry>>,
}

impl MemoryDlqStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DlqStore for MemoryDlqStore {
    async fn store(&self, entry: DlqEntry) -> ChainResult<()> {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.batch.batch_id != entry.batch.batch_id);
        entries.push(entry);
        Ok(())
    }

    async fn fetch(&self, batch_id: &str) -> ChainResult<Option<DlqEntry>> {
        let entries = self.entries.lock();
        Ok(entries.iter().find(|e| e.batch.batch_id == batch_id).cloned())
    }

    async fn remove(&self, batch_id: &str) -> ChainResult<bool> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.batch.batch_id != batch_id);
        Ok(entries.len() < before)
    }

    async fn scan(&self) -> ChainResult<Vec<DlqEntry>> {
        let mut entries = self.entries.lock().clone();
        entries.sort_by_key(|e| e.stored_at);
        Ok(entries)
    }

    async fn len(&self) -> ChainResult<usize> {
        Ok(self.entries.lock().len())
    }
}

/// File-backed store: one JSON document per entry, so entries are
/// operator-inspectable and store/remove are naturally idempotent.
pub struct FileDlqStore {
    dir: PathBuf,
}

impl FileDlqStore {
    /// Open (and create if needed) the storage directory.
    pub async fn new(dir: impl Into<PathBuf>) -> ChainResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ChainError::internal_with_source(
                format!("could not create DLQ directory '{}'", dir.display()),
                e,
            )
        })?;
        Ok(Self { dir })
    }

    /// Batch ids are uuid-shaped in practice; this only keeps path
    /// metacharacters out of filenames.
    fn sanitized(batch_id: &str) -> String {
        let cleaned: String = batch_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if cleaned.is_empty() {
            "batch".to_string()
        } else {
            cleaned
        }
    }

    fn entry_path(&self, batch_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::sanitized(batch_id)))
    }

    fn is_entry_file(path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.ends_with(".json") && !name.starts_with('.')
    }
}

#[async_trait]
impl DlqStore for FileDlqStore {
    async fn store(&self, entry: DlqEntry) -> ChainResult<()> {
        let bytes = serde_json::to_vec_pretty(&entry).map_err(|e| {
            ChainError::dlq_send_with_source("could not encode DLQ entry", e)
        })?;
        let path = self.entry_path(&entry.batch.batch_id);
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            Self::sanitized(&entry.batch.batch_id),
            Uuid::new_v4()
        ));
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            ChainError::dlq_send_with_source(
                format!("could not write DLQ entry '{}'", entry.batch.batch_id),
                e,
            )
        })?;
        // Rename is atomic on the same filesystem, so readers never observe
        // a partially written entry.
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            ChainError::dlq_send_with_source(
                format!("could not persist DLQ entry '{}'", entry.batch.batch_id),
                e,
            )
        })?;
        Ok(())
    }

    async fn fetch(&self, batch_id: &str) -> ChainResult<Option<DlqEntry>> {
        let path = self.entry_path(batch_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ChainError::internal_with_source(
                    format!("could not read DLQ entry '{}'", batch_id),
                    e,
                ))
            }
        };
        let entry = serde_json::from_slice(&bytes).map_err(|e| {
            ChainError::internal_with_source(format!("corrupt DLQ entry '{}'", batch_id), e)
        })?;
        Ok(Some(entry))
    }

    async fn remove(&self, batch_id: &str) -> ChainResult<bool> {
        match tokio::fs::remove_file(self.entry_path(batch_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ChainError::internal_with_source(
                format!("could not remove DLQ entry '{}'", batch_id),
                e,
            )),
        }
    }

    async fn scan(&self) -> ChainResult<Vec<DlqEntry>> {
        let mut dir = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            ChainError::internal_with_source(
                format!("could not scan DLQ directory '{}'", self.dir.display()),
                e,
            )
        })?;
        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await.map_err(|e| {
            ChainError::internal_with_source("could not walk DLQ directory", e)
        })? {
            let path = item.path();
            if !Self::is_entry_file(&path) {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping unreadable DLQ entry '{}': {}", path.display(), e);
                    continue;
                }
            };
            match serde_json::from_slice::<DlqEntry>(&bytes) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping corrupt DLQ entry '{}': {}", path.display(), e),
            }
        }
        entries.sort_by_key(|e| e.stored_at);
        Ok(entries)
    }

    async fn len(&self) -> ChainResult<usize> {
        let mut dir = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            ChainError::internal_with_source(
                format!("could not scan DLQ directory '{}'", self.dir.display()),
                e,
            )
        })?;
        let mut count = 0;
        while let Some(item) = dir.next_entry().await.map_err(|e| {
            ChainError::internal_with_source("could not walk DLQ directory", e)
        })? {
            if Self::is_entry_file(&item.path()) {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Annotate a failed batch and push it to the DLQ stage.
///
/// Returns whether the hand-off succeeded; the caller builds its
/// `ProcessResult` from that: original failure code with `sent_to_dlq =
/// true`, or `ERR_DLQ_SEND_FAILED` with `sent_to_dlq = false`.
pub async fn hand_off_to_dlq(
    dlq: Option<&dyn ChainPush>,
    sender: &str,
    metrics: &StageMetrics,
    batch: &MetricBatch,
    code: ErrorCode,
    message: &str,
) -> bool {
    let Some(dlq) = dlq else {
        warn!(
            "Stage '{}' has no DLQ target; dropping hand-off for batch '{}'",
            sender, batch.batch_id
        );
        metrics.dlq_handoff_failures_total.inc();
        return false;
    };

    let mut copy = batch.clone();
    copy.annotate_failure(sender, code, message);

    match dlq.push(copy).await {
        Ok(PushOutcome::Delivered) => {
            debug!(
                "Stage '{}' handed batch '{}' to the DLQ ({})",
                sender,
                batch.batch_id,
                code.as_str()
            );
            metrics.dlq_handoffs_total.inc();
            true
        }
        Ok(outcome) => {
            warn!(
                "DLQ refused batch '{}' from stage '{}': {:?}",
                batch.batch_id, sender, outcome
            );
            metrics.dlq_handoff_failures_total.inc();
            false
        }
        Err(e) => {
            warn!(
                "DLQ hand-off failed for batch '{}' from stage '{}': {}",
                batch.batch_id, sender, e
            );
            metrics.dlq_handoff_failures_total.inc();
            false
        }
    }
}
