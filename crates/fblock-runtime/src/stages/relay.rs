//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Relay stage
//!
//! Forwards batches to the next stage in the chain. Transport failures are
//! retried with backoff behind the circuit breaker; once attempts are
//! exhausted (or the breaker is open) the batch is handed to the DLQ. A
//! structured rejection from the downstream is final: the peer answered, so
//! the breaker records a success and the batch is not dead-lettered here.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use fblock_core::{
    ChainResult, CircuitState, ErrorCode, FunctionBlock, FunctionBlockBase, MetricBatch,
    ProcessResult, RetryConfig, RetryPolicy, StageMetrics, LABEL_FB_SENDER,
};

use crate::dlq::hand_off_to_dlq;
use crate::forwarder::{ChainPush, PushOutcome};
use crate::stages::record_breaker_state;

/// Function block that forwards every batch to a downstream stage.
pub struct RelayStage {
    base: FunctionBlockBase<()>,
    forwarder: Arc<dyn ChainPush>,
    dlq: Option<Arc<dyn ChainPush>>,
    retry: RetryPolicy,
    metrics: StageMetrics,
    last_breaker_state: Mutex<CircuitState>,
}

impl RelayStage {
    pub fn new(
        name: impl Into<String>,
        forwarder: Arc<dyn ChainPush>,
        dlq: Option<Arc<dyn ChainPush>>,
        retry: RetryConfig,
        metrics: StageMetrics,
    ) -> Self {
        Self {
            base: FunctionBlockBase::new(name),
            forwarder,
            dlq,
            retry: RetryPolicy::new(retry),
            metrics,
            last_breaker_state: Mutex::new(CircuitState::Closed),
        }
    }

    pub fn generation(&self) -> Option<u64> {
        self.base.generation()
    }

    async fn forward(&self, batch: MetricBatch) -> ProcessResult {
        let batch_id = batch.batch_id.clone();

        let mut outbound = batch;
        if let Some(generation) = self.base.generation() {
            outbound.config_generation = generation;
        }
        outbound
            .internal_labels
            .insert(LABEL_FB_SENDER.to_string(), self.base.name().to_string());

        let pushed = self
            .retry
            .execute(|| {
                let copy = outbound.clone();
                async move {
                    self.base
                        .breaker()
                        .execute(|| self.forwarder.push(copy))
                        .await
                }
            })
            .await;
        record_breaker_state(
            &self.metrics,
            &self.last_breaker_state,
            self.base.breaker().state(),
        );

        match pushed {
            Ok(PushOutcome::Delivered) => {
                self.metrics
                    .forwards_total
                    .with_label_values(&["delivered"])
                    .inc();
                self.base.record_completed(&batch_id);
                ProcessResult::success(batch_id)
            }
            Ok(PushOutcome::Throttled) => {
                debug!("Downstream throttled batch '{}'", batch_id);
                self.metrics
                    .forwards_total
                    .with_label_values(&["throttled"])
                    .inc();
                ProcessResult::throttled(batch_id)
            }
            Ok(PushOutcome::Rejected { code, message }) => {
                // The downstream processed the batch and routed the failure
                // itself; report its verdict upstream unchanged.
                warn!(
                    "Downstream rejected batch '{}': {} ({})",
                    batch_id,
                    message,
                    code.as_str()
                );
                self.metrics
                    .forwards_total
                    .with_label_values(&["rejected"])
                    .inc();
                ProcessResult::error(batch_id, code, message)
            }
            Err(e) => {
                warn!("Forwarding batch '{}' failed: {}", batch_id, e);
                self.metrics
                    .forwards_total
                    .with_label_values(&["error"])
                    .inc();
                let result_code = if e.error_code() == ErrorCode::ErrCircuitBreakerOpen {
                    ErrorCode::ErrCircuitBreakerOpen
                } else {
                    ErrorCode::ErrForwardingFailed
                };
                let handed_off = hand_off_to_dlq(
                    self.dlq.as_deref(),
                    self.base.name(),
                    &self.metrics,
                    &outbound,
                    e.error_code(),
                    &e.to_string(),
                )
                .await;
                if handed_off {
                    ProcessResult::error(batch_id, result_code, e.to_string()).with_dlq(true)
                } else {
                    ProcessResult::error(
                        batch_id,
                        ErrorCode::ErrDlqSendFailed,
                        format!("forwarding failed and DLQ hand-off failed: {}", e),
                    )
                }
            }
        }
    }
}

#[async_trait]
impl FunctionBlock for RelayStage {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn initialize(&self) -> ChainResult<()> {
        self.base.mark_initialized();
        info!("Relay stage '{}' initialized", self.base.name());
        Ok(())
    }

    async fn process_batch(&self, batch: MetricBatch) -> ChainResult<ProcessResult> {
        if !self.ready() {
            return Ok(ProcessResult::error(
                batch.batch_id.clone(),
                ErrorCode::ErrServiceUnavailable,
                "relay stage is not ready",
            ));
        }
        if self.base.replay_already_done(&batch) {
            debug!(
                "Relay stage '{}' already forwarded replayed batch '{}'",
                self.base.name(),
                batch.batch_id
            );
            return Ok(ProcessResult::success(batch.batch_id));
        }
        Ok(self.forward(batch).await)
    }

    async fn update_config(&self, raw: &[u8], generation: u64) -> ChainResult<()> {
        match self.base.apply_config(raw, generation, |_, _| Ok(())).await {
            Ok(_) => {
                if let Some(current) = self.base.generation() {
                    self.metrics.config_generation.set(current as i64);
                }
                Ok(())
            }
            Err(e) => {
                self.metrics.config_apply_failures_total.inc();
                Err(e)
            }
        }
    }

    fn ready(&self) -> bool {
        self.base.is_ready()
    }

    async fn shutdown(&self) -> ChainResult<()> {
        if self.base.begin_drain() {
            info!("Relay stage '{}' shutting down", self.base.name());
            self.forwarder.disconnect().await;
            if let Some(dlq) = &self.dlq {
                dlq.disconnect().await;
            }
        }
        Ok(())
    }
}
