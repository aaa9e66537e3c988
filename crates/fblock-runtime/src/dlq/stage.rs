//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! DLQ function block
//!
//! Terminal stage of the failure path: it persists annotated batches and
//! never forwards or retries them. Storage failures surface as
//! `ERR_DLQ_SEND_FAILED` so upstream stages can tell "dead-lettered" from
//! "lost".

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use fblock_core::{
    ChainResult, ErrorCode, FunctionBlock, FunctionBlockBase, MetricBatch, ProcessResult,
    StageMetrics,
};

use super::{DlqEntry, DlqStore};

/// Function block that persists dead-lettered batches.
pub struct DlqStage {
    base: FunctionBlockBase<()>,
    store: Arc<dyn DlqStore>,
    metrics: StageMetrics,
}

impl DlqStage {
    pub fn new(name: impl Into<String>, store: Arc<dyn DlqStore>, metrics: StageMetrics) -> Self {
        Self {
            base: FunctionBlockBase::new(name),
            store,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn DlqStore> {
        &self.store
    }

    pub fn generation(&self) -> Option<u64> {
        self.base.generation()
    }
}

#[async_trait]
impl FunctionBlock for DlqStage {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn initialize(&self) -> ChainResult<()> {
        self.base.mark_initialized();
        info!("DLQ stage '{}' initialized", self.base.name());
        Ok(())
    }

    async fn process_batch(&self, batch: MetricBatch) -> ChainResult<ProcessResult> {
        if !self.ready() {
            return Ok(ProcessResult::error(
                batch.batch_id.clone(),
                ErrorCode::ErrServiceUnavailable,
                "DLQ stage is not ready",
            ));
        }

        let batch_id = batch.batch_id.clone();
        // No replay-guard short circuit here: a replayed hand-off must still
        // land in the store, and store() replaces on batch id anyway.
        match self.store.store(DlqEntry::new(batch)).await {
            Ok(()) => {
                self.base.record_completed(&batch_id);
                self.metrics.dlq_handoffs_total.inc();
                Ok(ProcessResult::success(batch_id))
            }
            Err(e) => {
                warn!("DLQ stage could not persist batch '{}': {}", batch_id, e);
                self.metrics.dlq_handoff_failures_total.inc();
                Ok(ProcessResult::error(
                    batch_id,
                    ErrorCode::ErrDlqSendFailed,
                    e.to_string(),
                ))
            }
        }
    }

    async fn update_config(&self, raw: &[u8], generation: u64) -> ChainResult<()> {
        self.base.apply_config(raw, generation, |_, _| Ok(())).await?;
        Ok(())
    }

    fn ready(&self) -> bool {
        self.base.is_ready()
    }

    async fn shutdown(&self) -> ChainResult<()> {
        if self.base.begin_drain() {
            info!("DLQ stage '{}' shutting down", self.base.name());
        }
        Ok(())
    }
}
