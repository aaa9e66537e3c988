//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! DLQ replay driver
//!
//! Re-injects dead-lettered batches at the head of the chain. An entry is
//! removed from the store only after the head stage reports success; until
//! then the stored entry is never touched, so a crash mid-replay loses
//! nothing. Batches the downstream keeps rejecting are marked poisoned and
//! skipped for the rest of the process lifetime instead of looping forever.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use fblock_core::{ChainResult, ErrorCode, StageMetrics};

use super::{DlqEntry, DlqStore};
use crate::forwarder::{ChainPush, PushOutcome};

/// Tuning for the replay driver.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Entries replayed in flight at once.
    pub concurrency: usize,

    /// Definitive rejections (or timeouts) after which an entry is marked
    /// poisoned and skipped. Throttling and transport failures never count.
    pub poison_threshold: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poison_threshold: 5,
        }
    }
}

/// Outcome tally of one replay pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Batches pushed to the head stage this pass.
    pub replayed: usize,

    /// Batches delivered and removed from the store.
    pub removed: usize,

    /// Batches that stayed in the store for a later pass.
    pub failed: usize,

    /// Batches newly marked poisoned this pass.
    pub poisoned: usize,
}

/// Drives replay passes over the DLQ store.
pub struct ReplayDriver {
    store: Arc<dyn DlqStore>,
    head: Arc<dyn ChainPush>,
    config: ReplayConfig,
    attempts: Mutex<HashMap<String, u32>>,
    poisoned: Mutex<HashSet<String>>,
    metrics: StageMetrics,
}

impl ReplayDriver {
    pub fn new(
        store: Arc<dyn DlqStore>,
        head: Arc<dyn ChainPush>,
        config: ReplayConfig,
        metrics: StageMetrics,
    ) -> Self {
        Self {
            store,
            head,
            config,
            attempts: Mutex::new(HashMap::new()),
            poisoned: Mutex::new(HashSet::new()),
            metrics,
        }
    }

    /// Replay everything currently in the store once.
    pub async fn replay_once(&self) -> ChainResult<ReplayReport> {
        let entries = self.store.scan().await?;
        let report = Mutex::new(ReplayReport::default());

        stream::iter(entries)
            .for_each_concurrent(self.config.concurrency.max(1), |entry| {
                self.replay_entry(entry, &report)
            })
            .await;

        let report = report.into_inner();
        if report.replayed > 0 {
            info!(
                "Replay pass: {} pushed, {} removed, {} kept, {} poisoned",
                report.replayed, report.removed, report.failed, report.poisoned
            );
        }
        Ok(report)
    }

    /// Replay the store on a fixed interval until shutdown is signalled.
    pub async fn run_interval(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.replay_once().await {
                        warn!("Replay pass failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Replay driver stopped");
    }

    async fn replay_entry(&self, entry: DlqEntry, report: &Mutex<ReplayReport>) {
        let batch_id = entry.batch.batch_id.clone();
        if self.poisoned.lock().contains(&batch_id) {
            return;
        }
        let prior = self.attempts.lock().get(&batch_id).copied().unwrap_or(0);

        let mut copy = entry.batch.clone().for_replay();
        copy.set_replay_count(prior + 1);

        report.lock().replayed += 1;
        match self.head.push(copy).await {
            Ok(PushOutcome::Delivered) => {
                self.attempts.lock().remove(&batch_id);
                match self.store.remove(&batch_id).await {
                    Ok(_) => report.lock().removed += 1,
                    // The head already has the batch; the leftover entry is
                    // re-delivered idempotently on the next pass.
                    Err(e) => warn!(
                        "Replayed batch '{}' but could not remove its entry: {}",
                        batch_id, e
                    ),
                }
                self.metrics
                    .replay_batches_total
                    .with_label_values(&["delivered"])
                    .inc();
            }
            Ok(PushOutcome::Throttled) => {
                debug!("Head stage throttled replay of batch '{}'", batch_id);
                report.lock().failed += 1;
                self.metrics
                    .replay_batches_total
                    .with_label_values(&["throttled"])
                    .inc();
            }
            Ok(PushOutcome::Rejected { code, message }) => {
                warn!(
                    "Head stage rejected replay of batch '{}': {} ({})",
                    batch_id,
                    message,
                    code.as_str()
                );
                self.note_definitive_failure(&batch_id, prior + 1, "rejected", report);
            }
            Err(e) if e.error_code() == ErrorCode::ErrTimeout => {
                warn!("Replay of batch '{}' timed out: {}", batch_id, e);
                self.note_definitive_failure(&batch_id, prior + 1, "error", report);
            }
            Err(e) => {
                // Transport trouble says nothing about the batch itself.
                warn!("Replay of batch '{}' failed to reach the head: {}", batch_id, e);
                report.lock().failed += 1;
                self.metrics
                    .replay_batches_total
                    .with_label_values(&["error"])
                    .inc();
            }
        }
    }

    fn note_definitive_failure(
        &self,
        batch_id: &str,
        attempt: u32,
        outcome: &str,
        report: &Mutex<ReplayReport>,
    ) {
        self.attempts.lock().insert(batch_id.to_string(), attempt);
        if attempt >= self.config.poison_threshold {
            warn!(
                "Batch '{}' poisoned after {} replay attempts; leaving it in the store",
                batch_id, attempt
            );
            self.poisoned.lock().insert(batch_id.to_string());
            report.lock().poisoned += 1;
            self.metrics
                .replay_batches_total
                .with_label_values(&["poisoned"])
                .inc();
        } else {
            report.lock().failed += 1;
            self.metrics
                .replay_batches_total
                .with_label_values(&[outcome])
                .inc();
        }
    }
}
