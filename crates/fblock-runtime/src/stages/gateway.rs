//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Gateway stage
//!
//! Terminal stage at the export boundary. With `schema_enforce` on, every
//! batch passes through the validator capability first; a batch that fails
//! (bad field, missing field, or detected PII) is annotated and handed to
//! the DLQ instead of being exported, and the caller sees
//! `ERR_INVALID_INPUT` with `sent_to_dlq` set. Validation failure and DLQ
//! failure are never conflated: a failed hand-off reports
//! `ERR_DLQ_SEND_FAILED` with `sent_to_dlq` false.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use fblock_core::{
    ChainError, ChainResult, CircuitState, ErrorCode, FunctionBlock, FunctionBlockBase,
    InternalLabelPolicy, MetricBatch, ProcessResult, RetryConfig, RetryPolicy, StageMetrics,
};

use crate::dlq::hand_off_to_dlq;
use crate::forwarder::ChainPush;
use crate::stages::record_breaker_state;

/// Which class of rule a batch violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    InvalidField,
    MissingField,
    Pii,
}

/// Verdict returned by the validator capability.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationVerdict {
    pub valid: bool,
    pub error: Option<String>,
    pub path: Option<String>,
    pub kind: Option<ValidationKind>,
}

impl ValidationVerdict {
    pub fn ok() -> Self {
        Self {
            valid: true,
            error: None,
            path: None,
            kind: None,
        }
    }

    pub fn invalid(
        kind: ValidationKind,
        path: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            path: Some(path.into()),
            kind: Some(kind),
        }
    }
}

/// Schema/PII validator consumed by the gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchValidator: Send + Sync {
    async fn validate(&self, payload: &Value) -> ChainResult<ValidationVerdict>;
}

/// Export boundary the gateway ships validated batches through.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchExporter: Send + Sync {
    async fn export(&self, batch: &MetricBatch) -> ChainResult<()>;
}

/// Built-in validator covering structural checks and PII scanning.
///
/// Richer schema enforcement lives behind the `BatchValidator` seam; this
/// implementation checks that the payload carries the required top-level
/// array and that no string value matches a PII pattern.
pub struct StructuralValidator {
    required_field: String,
    pii_patterns: Vec<Regex>,
}

impl StructuralValidator {
    /// Defaults: require `resource_metrics` and flag email-shaped strings.
    pub fn new() -> ChainResult<Self> {
        Self::with_rules(
            "resource_metrics",
            &[r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"],
        )
    }

    pub fn with_rules(
        required_field: impl Into<String>,
        pii_patterns: &[&str],
    ) -> ChainResult<Self> {
        let compiled = pii_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    ChainError::invalid_config_with_source(
                        format!("invalid PII pattern '{}'", p),
                        e,
                    )
                })
            })
            .collect::<ChainResult<Vec<_>>>()?;
        Ok(Self {
            required_field: required_field.into(),
            pii_patterns: compiled,
        })
    }

    /// Depth-first scan for PII; returns the path of the first hit.
    fn scan(&self, value: &Value, path: &str) -> Option<String> {
        match value {
            Value::String(s) => self
                .pii_patterns
                .iter()
                .any(|p| p.is_match(s))
                .then(|| path.to_string()),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .find_map(|(i, v)| self.scan(v, &format!("{}[{}]", path, i))),
            Value::Object(map) => map.iter().find_map(|(k, v)| {
                let child = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", path, k)
                };
                self.scan(v, &child)
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl BatchValidator for StructuralValidator {
    async fn validate(&self, payload: &Value) -> ChainResult<ValidationVerdict> {
        match payload.get(&self.required_field) {
            None => {
                return Ok(ValidationVerdict::invalid(
                    ValidationKind::MissingField,
                    self.required_field.clone(),
                    format!("missing required field '{}'", self.required_field),
                ))
            }
            Some(v) if !v.is_array() => {
                return Ok(ValidationVerdict::invalid(
                    ValidationKind::InvalidField,
                    self.required_field.clone(),
                    format!("field '{}' must be an array", self.required_field),
                ))
            }
            Some(_) => {}
        }
        if let Some(path) = self.scan(payload, "") {
            return Ok(ValidationVerdict::invalid(
                ValidationKind::Pii,
                path,
                "string value matches a PII pattern",
            ));
        }
        Ok(ValidationVerdict::ok())
    }
}

/// Exporter stand-in that records the batch instead of shipping it.
pub struct LoggingExporter;

#[async_trait]
impl BatchExporter for LoggingExporter {
    async fn export(&self, batch: &MetricBatch) -> ChainResult<()> {
        info!(
            "Exported batch '{}' ({} bytes, format '{}')",
            batch.batch_id,
            batch.payload_size(),
            batch.format
        );
        Ok(())
    }
}

/// Stage-specific parameters carried in `FbConfig::parameters`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayParams {
    /// Gate batches through the validator before export.
    #[serde(default)]
    pub schema_enforce: bool,
}

/// Function block guarding the export boundary.
pub struct GatewayStage {
    base: FunctionBlockBase<GatewayParams>,
    validator: Arc<dyn BatchValidator>,
    exporter: Arc<dyn BatchExporter>,
    dlq: Option<Arc<dyn ChainPush>>,
    retry: RetryPolicy,
    metrics: StageMetrics,
    last_breaker_state: Mutex<CircuitState>,
}

impl GatewayStage {
    pub fn new(
        name: impl Into<String>,
        validator: Arc<dyn BatchValidator>,
        exporter: Arc<dyn BatchExporter>,
        dlq: Option<Arc<dyn ChainPush>>,
        retry: RetryConfig,
        metrics: StageMetrics,
    ) -> Self {
        Self {
            base: FunctionBlockBase::new(name),
            validator,
            exporter,
            dlq,
            retry: RetryPolicy::new(retry),
            metrics,
            last_breaker_state: Mutex::new(CircuitState::Closed),
        }
    }

    pub fn generation(&self) -> Option<u64> {
        self.base.generation()
    }

    /// Annotate, hand off, and build the caller-facing result.
    async fn reject(
        &self,
        batch: MetricBatch,
        label_code: ErrorCode,
        message: String,
    ) -> ProcessResult {
        warn!(
            "Gateway stage '{}' rejected batch '{}': {}",
            self.base.name(),
            batch.batch_id,
            message
        );
        let handed_off = hand_off_to_dlq(
            self.dlq.as_deref(),
            self.base.name(),
            &self.metrics,
            &batch,
            label_code,
            &message,
        )
        .await;
        if handed_off {
            ProcessResult::error(batch.batch_id, ErrorCode::ErrInvalidInput, message).with_dlq(true)
        } else {
            ProcessResult::error(
                batch.batch_id,
                ErrorCode::ErrDlqSendFailed,
                format!("validation failed and DLQ hand-off failed: {}", message),
            )
        }
    }

    async fn export(&self, batch: MetricBatch, policy: InternalLabelPolicy) -> ProcessResult {
        let batch_id = batch.batch_id.clone();

        let mut copy = batch;
        if let Some(generation) = self.base.generation() {
            copy.config_generation = generation;
        }
        if policy == InternalLabelPolicy::StripOnExport {
            copy.internal_labels.clear();
        }

        let exported = self
            .retry
            .execute(|| {
                self.base
                    .breaker()
                    .execute(|| self.exporter.export(&copy))
            })
            .await;
        record_breaker_state(
            &self.metrics,
            &self.last_breaker_state,
            self.base.breaker().state(),
        );

        match exported {
            Ok(()) => {
                self.metrics
                    .forwards_total
                    .with_label_values(&["delivered"])
                    .inc();
                self.base.record_completed(&batch_id);
                ProcessResult::success(batch_id)
            }
            Err(e) => {
                warn!("Exporting batch '{}' failed: {}", batch_id, e);
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
                    &copy,
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
                        format!("export failed and DLQ hand-off failed: {}", e),
                    )
                }
            }
        }
    }
}

#[async_trait]
impl FunctionBlock for GatewayStage {
    fn name(&self) -> &str {
        self.base.name()
    }

    async fn initialize(&self) -> ChainResult<()> {
        self.base.mark_initialized();
        info!("Gateway stage '{}' initialized", self.base.name());
        Ok(())
    }

    async fn process_batch(&self, batch: MetricBatch) -> ChainResult<ProcessResult> {
        if !self.ready() {
            return Ok(ProcessResult::error(
                batch.batch_id.clone(),
                ErrorCode::ErrServiceUnavailable,
                "gateway stage is not ready",
            ));
        }
        if self.base.replay_already_done(&batch) {
            debug!(
                "Gateway stage '{}' already exported replayed batch '{}'",
                self.base.name(),
                batch.batch_id
            );
            return Ok(ProcessResult::success(batch.batch_id));
        }
        let Some(snapshot) = self.base.snapshot() else {
            return Ok(ProcessResult::error(
                batch.batch_id.clone(),
                ErrorCode::ErrServiceUnavailable,
                "gateway stage has no applied configuration",
            ));
        };

        if snapshot.params.schema_enforce {
            let payload: Value = match serde_json::from_slice(&batch.data) {
                Ok(payload) => payload,
                Err(e) => {
                    let message = format!("payload is not valid JSON: {}", e);
                    return Ok(self.reject(batch, ErrorCode::ErrInvalidInput, message).await);
                }
            };
            match self.validator.validate(&payload).await {
                Ok(verdict) if !verdict.valid => {
                    let label_code = match verdict.kind {
                        Some(ValidationKind::Pii) => ErrorCode::ErrPiiLeak,
                        _ => ErrorCode::ErrInvalidInput,
                    };
                    let message = match (&verdict.error, &verdict.path) {
                        (Some(error), Some(path)) => format!("{} (at {})", error, path),
                        (Some(error), None) => error.clone(),
                        _ => "validation failed".to_string(),
                    };
                    return Ok(self.reject(batch, label_code, message).await);
                }
                Ok(_) => {}
                Err(e) => {
                    // The validator itself failing is an infrastructure
                    // problem, not a verdict about the batch.
                    warn!(
                        "Validator failed for batch '{}': {}",
                        batch.batch_id, e
                    );
                    return Ok(ProcessResult::error(
                        batch.batch_id,
                        ErrorCode::ErrProcessingFailed,
                        format!("validator failed: {}", e),
                    ));
                }
            }
        }

        Ok(self
            .export(batch, snapshot.global.internal_label_policy)
            .await)
    }

    async fn update_config(&self, raw: &[u8], generation: u64) -> ChainResult<()> {
        let applied = self
            .base
            .apply_config(raw, generation, |_, fb| {
                serde_json::from_value::<GatewayParams>(fb.parameters.clone()).map_err(|e| {
                    ChainError::invalid_config_with_source("invalid gateway parameters", e)
                })
            })
            .await;
        match applied {
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
            info!("Gateway stage '{}' shutting down", self.base.name());
            if let Some(dlq) = &self.dlq {
                dlq.disconnect().await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::{MockChainPush, PushOutcome};
    use crate::testutil;
    use fblock_core::{ProcessStatus, LABEL_ERROR_CODE, LABEL_FB_SENDER};
    use prometheus::Registry;
    use serde_json::json;

    fn metrics() -> StageMetrics {
        StageMetrics::new(&Registry::new()).unwrap()
    }

    fn single_attempt() -> RetryConfig {
        RetryConfig {
            max_attempts: 1,
            initial_backoff_ms: 1,
            enable_jitter: false,
            ..Default::default()
        }
    }

    fn stage(
        validator: Arc<dyn BatchValidator>,
        exporter: Arc<dyn BatchExporter>,
        dlq: Option<MockChainPush>,
    ) -> GatewayStage {
        GatewayStage::new(
            "fb-gw",
            validator,
            exporter,
            dlq.map(|d| Arc::new(d) as Arc<dyn ChainPush>),
            single_attempt(),
            metrics(),
        )
    }

    async fn apply_config(stage: &GatewayStage, params: serde_json::Value, preserve_labels: bool) {
        let mut config = testutil::pipeline_with(1, &["fb-gw"]);
        config
            .function_blocks
            .get_mut("fb-gw")
            .unwrap()
            .parameters = params;
        if preserve_labels {
            config.global.internal_label_policy = InternalLabelPolicy::Preserve;
        }
        let raw = serde_json::to_vec(&config).unwrap();
        stage.update_config(&raw, 1).await.unwrap();
    }

    fn batch_with_payload(payload: serde_json::Value) -> MetricBatch {
        MetricBatch::new(serde_json::to_vec(&payload).unwrap(), "otlp").with_batch_id("b-1")
    }

    #[tokio::test]
    async fn test_missing_required_field_goes_to_dlq() {
        let mut dlq = MockChainPush::new();
        dlq.expect_push()
            .withf(|b| {
                b.internal_labels.get(LABEL_FB_SENDER).map(String::as_str) == Some("fb-gw")
                    && b.internal_labels.get(LABEL_ERROR_CODE).map(String::as_str)
                        == Some("ERR_INVALID_INPUT")
            })
            .times(1)
            .returning(|_| Ok(PushOutcome::Delivered));

        let gw = stage(
            Arc::new(StructuralValidator::new().unwrap()),
            Arc::new(LoggingExporter),
            Some(dlq),
        );
        gw.initialize().await.unwrap();
        apply_config(&gw, json!({"schema_enforce": true}), false).await;

        let result = gw
            .process_batch(batch_with_payload(json!({"spans": []})))
            .await
            .unwrap();

        assert_eq!(result.status, ProcessStatus::Error);
        assert_eq!(result.error_code, Some(ErrorCode::ErrInvalidInput));
        assert!(result.sent_to_dlq);
    }

    #[tokio::test]
    async fn test_pii_is_labelled_distinctly() {
        let mut dlq = MockChainPush::new();
        dlq.expect_push()
            .withf(|b| {
                b.internal_labels.get(LABEL_ERROR_CODE).map(String::as_str)
                    == Some("ERR_PII_LEAK")
            })
            .times(1)
            .returning(|_| Ok(PushOutcome::Delivered));

        let gw = stage(
            Arc::new(StructuralValidator::new().unwrap()),
            Arc::new(LoggingExporter),
            Some(dlq),
        );
        gw.initialize().await.unwrap();
        apply_config(&gw, json!({"schema_enforce": true}), false).await;

        let payload = json!({
            "resource_metrics": [
                {"attributes": {"owner": "bob@example.com"}}
            ]
        });
        let result = gw.process_batch(batch_with_payload(payload)).await.unwrap();

        // the caller-facing code stays ERR_INVALID_INPUT; the label carries
        // the PII classification
        assert_eq!(result.error_code, Some(ErrorCode::ErrInvalidInput));
        assert!(result.sent_to_dlq);
    }

    #[tokio::test]
    async fn test_failed_handoff_is_never_conflated_with_validation() {
        let mut dlq = MockChainPush::new();
        dlq.expect_push()
            .returning(|_| Err(fblock_core::ChainError::unavailable("dlq is down")));

        let gw = stage(
            Arc::new(StructuralValidator::new().unwrap()),
            Arc::new(LoggingExporter),
            Some(dlq),
        );
        gw.initialize().await.unwrap();
        apply_config(&gw, json!({"schema_enforce": true}), false).await;

        let result = gw
            .process_batch(batch_with_payload(json!({"spans": []})))
            .await
            .unwrap();

        assert_eq!(result.error_code, Some(ErrorCode::ErrDlqSendFailed));
        assert!(!result.sent_to_dlq);
    }

    #[tokio::test]
    async fn test_valid_batch_is_exported_with_labels_stripped() {
        let mut exporter = MockBatchExporter::new();
        exporter
            .expect_export()
            .withf(|b| b.internal_labels.is_empty() && b.metadata.contains_key("tenant"))
            .times(1)
            .returning(|_| Ok(()));

        let gw = stage(
            Arc::new(StructuralValidator::new().unwrap()),
            Arc::new(exporter),
            None,
        );
        gw.initialize().await.unwrap();
        apply_config(&gw, json!({"schema_enforce": true}), false).await;

        let mut batch = batch_with_payload(json!({"resource_metrics": []}))
            .with_metadata("tenant", "acme");
        batch
            .internal_labels
            .insert("replay_count".to_string(), "2".to_string());
        let result = gw.process_batch(batch).await.unwrap();

        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_preserve_policy_keeps_labels_on_export() {
        let mut exporter = MockBatchExporter::new();
        exporter
            .expect_export()
            .withf(|b| b.internal_labels.contains_key("replay_count"))
            .times(1)
            .returning(|_| Ok(()));

        let gw = stage(
            Arc::new(StructuralValidator::new().unwrap()),
            Arc::new(exporter),
            None,
        );
        gw.initialize().await.unwrap();
        apply_config(&gw, json!({"schema_enforce": true}), true).await;

        let mut batch = batch_with_payload(json!({"resource_metrics": []}));
        batch
            .internal_labels
            .insert("replay_count".to_string(), "2".to_string());
        assert!(gw.process_batch(batch).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_enforcement_off_skips_validation() {
        let mut exporter = MockBatchExporter::new();
        exporter.expect_export().times(1).returning(|_| Ok(()));

        let gw = stage(
            Arc::new(StructuralValidator::new().unwrap()),
            Arc::new(exporter),
            None,
        );
        gw.initialize().await.unwrap();
        apply_config(&gw, json!({}), false).await;

        // not even JSON, but enforcement is off
        let batch = MetricBatch::new(b"\x00\x01\x02".to_vec(), "otlp");
        assert!(gw.process_batch(batch).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_validator_infrastructure_failure_is_not_a_verdict() {
        let mut validator = MockBatchValidator::new();
        validator
            .expect_validate()
            .returning(|_| Err(fblock_core::ChainError::internal("validator crashed")));
        let mut dlq = MockChainPush::new();
        dlq.expect_push().times(0);

        let gw = stage(Arc::new(validator), Arc::new(LoggingExporter), Some(dlq));
        gw.initialize().await.unwrap();
        apply_config(&gw, json!({"schema_enforce": true}), false).await;

        let result = gw
            .process_batch(batch_with_payload(json!({"resource_metrics": []})))
            .await
            .unwrap();

        assert_eq!(result.error_code, Some(ErrorCode::ErrProcessingFailed));
        assert!(!result.sent_to_dlq);
    }

    #[tokio::test]
    async fn test_export_failure_hands_off_to_dlq() {
        let mut exporter = MockBatchExporter::new();
        exporter
            .expect_export()
            .returning(|_| Err(fblock_core::ChainError::unavailable("sink is down")));
        let mut dlq = MockChainPush::new();
        dlq.expect_push()
            .withf(|b| {
                b.internal_labels.get(LABEL_ERROR_CODE).map(String::as_str)
                    == Some("ERR_SERVICE_UNAVAILABLE")
            })
            .times(1)
            .returning(|_| Ok(PushOutcome::Delivered));

        let gw = stage(
            Arc::new(StructuralValidator::new().unwrap()),
            Arc::new(exporter),
            Some(dlq),
        );
        gw.initialize().await.unwrap();
        apply_config(&gw, json!({"schema_enforce": true}), false).await;

        let result = gw
            .process_batch(batch_with_payload(json!({"resource_metrics": []})))
            .await
            .unwrap();

        assert_eq!(result.error_code, Some(ErrorCode::ErrForwardingFailed));
        assert!(result.sent_to_dlq);
    }

    #[tokio::test]
    async fn test_structural_validator_verdicts() {
        let validator = StructuralValidator::new().unwrap();

        let missing = validator.validate(&json!({"spans": []})).await.unwrap();
        assert!(!missing.valid);
        assert_eq!(missing.kind, Some(ValidationKind::MissingField));
        assert_eq!(missing.path.as_deref(), Some("resource_metrics"));

        let wrong_type = validator
            .validate(&json!({"resource_metrics": 5}))
            .await
            .unwrap();
        assert_eq!(wrong_type.kind, Some(ValidationKind::InvalidField));

        let pii = validator
            .validate(&json!({
                "resource_metrics": [{"attributes": {"owner": "bob@example.com"}}]
            }))
            .await
            .unwrap();
        assert_eq!(pii.kind, Some(ValidationKind::Pii));
        assert_eq!(
            pii.path.as_deref(),
            Some("resource_metrics[0].attributes.owner")
        );

        let clean = validator
            .validate(&json!({"resource_metrics": [{"name": "cpu"}]}))
            .await
            .unwrap();
        assert!(clean.valid);
    }
}
