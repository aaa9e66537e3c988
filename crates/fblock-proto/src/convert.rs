//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Conversions between wire types and the `fblock-core` domain model
//!
//! Batch and result conversions are infallible field moves. Configuration
//! conversions are fallible: per-block parameters travel as JSON bytes and
//! breaker thresholds narrow from `uint32` to the domain's `u8`.

use std::collections::HashMap;

use fblock_core::{
    ChainError, ChainResult, CircuitBreakerConfig, ErrorCode, FbConfig, GlobalSettings,
    InternalLabelPolicy, MetricBatch, PipelineConfig, ProcessResult, ProcessStatus,
};

use crate::fblock::v1;

impl From<ProcessStatus> for v1::PushStatus {
    fn from(status: ProcessStatus) -> Self {
        match status {
            ProcessStatus::Unknown => v1::PushStatus::Unknown,
            ProcessStatus::Success => v1::PushStatus::Success,
            ProcessStatus::Error => v1::PushStatus::Error,
            ProcessStatus::Throttled => v1::PushStatus::Throttled,
        }
    }
}

impl From<v1::PushStatus> for ProcessStatus {
    fn from(status: v1::PushStatus) -> Self {
        match status {
            v1::PushStatus::Unknown => ProcessStatus::Unknown,
            v1::PushStatus::Success => ProcessStatus::Success,
            v1::PushStatus::Error => ProcessStatus::Error,
            v1::PushStatus::Throttled => ProcessStatus::Throttled,
        }
    }
}

impl From<ErrorCode> for v1::ErrorCode {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::ErrUnknown => v1::ErrorCode::ErrUnknown,
            ErrorCode::ErrInvalidInput => v1::ErrorCode::ErrInvalidInput,
            ErrorCode::ErrInvalidConfig => v1::ErrorCode::ErrInvalidConfig,
            ErrorCode::ErrProcessingFailed => v1::ErrorCode::ErrProcessingFailed,
            ErrorCode::ErrForwardingFailed => v1::ErrorCode::ErrForwardingFailed,
            ErrorCode::ErrCircuitBreakerOpen => v1::ErrorCode::ErrCircuitBreakerOpen,
            ErrorCode::ErrDlqSendFailed => v1::ErrorCode::ErrDlqSendFailed,
            ErrorCode::ErrPoisonBatch => v1::ErrorCode::ErrPoisonBatch,
            ErrorCode::ErrPiiLeak => v1::ErrorCode::ErrPiiLeak,
            ErrorCode::ErrThrottled => v1::ErrorCode::ErrThrottled,
            ErrorCode::ErrServiceUnavailable => v1::ErrorCode::ErrServiceUnavailable,
            ErrorCode::ErrTimeout => v1::ErrorCode::ErrTimeout,
        }
    }
}

impl From<v1::ErrorCode> for ErrorCode {
    fn from(code: v1::ErrorCode) -> Self {
        match code {
            v1::ErrorCode::ErrUnknown => ErrorCode::ErrUnknown,
            v1::ErrorCode::ErrInvalidInput => ErrorCode::ErrInvalidInput,
            v1::ErrorCode::ErrInvalidConfig => ErrorCode::ErrInvalidConfig,
            v1::ErrorCode::ErrProcessingFailed => ErrorCode::ErrProcessingFailed,
            v1::ErrorCode::ErrForwardingFailed => ErrorCode::ErrForwardingFailed,
            v1::ErrorCode::ErrCircuitBreakerOpen => ErrorCode::ErrCircuitBreakerOpen,
            v1::ErrorCode::ErrDlqSendFailed => ErrorCode::ErrDlqSendFailed,
            v1::ErrorCode::ErrPoisonBatch => ErrorCode::ErrPoisonBatch,
            v1::ErrorCode::ErrPiiLeak => ErrorCode::ErrPiiLeak,
            v1::ErrorCode::ErrThrottled => ErrorCode::ErrThrottled,
            v1::ErrorCode::ErrServiceUnavailable => ErrorCode::ErrServiceUnavailable,
            v1::ErrorCode::ErrTimeout => ErrorCode::ErrTimeout,
        }
    }
}

impl From<MetricBatch> for v1::MetricBatchRequest {
    fn from(batch: MetricBatch) -> Self {
        Self {
            batch_id: batch.batch_id,
            data: batch.data,
            format: batch.format,
            replay: batch.replay,
            config_generation: batch.config_generation,
            metadata: batch.metadata,
            internal_labels: batch.internal_labels,
        }
    }
}

impl From<v1::MetricBatchRequest> for MetricBatch {
    fn from(request: v1::MetricBatchRequest) -> Self {
        Self {
            batch_id: request.batch_id,
            data: request.data,
            format: request.format,
            replay: request.replay,
            config_generation: request.config_generation,
            metadata: request.metadata,
            internal_labels: request.internal_labels,
        }
    }
}

impl From<ProcessResult> for v1::MetricBatchResponse {
    fn from(result: ProcessResult) -> Self {
        let error_code = result
            .error_code
            .map(v1::ErrorCode::from)
            .unwrap_or(v1::ErrorCode::ErrUnknown);
        Self {
            status: v1::PushStatus::from(result.status) as i32,
            error_message: result.error_message.unwrap_or_default(),
            error_code: error_code as i32,
            batch_id: result.batch_id,
        }
    }
}

impl From<v1::MetricBatchResponse> for ProcessResult {
    fn from(response: v1::MetricBatchResponse) -> Self {
        let status = ProcessStatus::from(response.status());
        let error_code = match status {
            ProcessStatus::Success => None,
            _ => Some(ErrorCode::from(response.error_code())),
        };
        let error_message = if response.error_message.is_empty() {
            None
        } else {
            Some(response.error_message)
        };
        Self {
            status,
            error_code,
            error_message,
            batch_id: response.batch_id,
            // The wire response does not carry DLQ routing; callers infer it
            // from the error code.
            sent_to_dlq: false,
        }
    }
}

fn policy_to_wire(policy: InternalLabelPolicy) -> String {
    match policy {
        InternalLabelPolicy::Preserve => "preserve".to_string(),
        InternalLabelPolicy::StripOnExport => "strip_on_export".to_string(),
    }
}

fn policy_from_wire(value: &str) -> ChainResult<InternalLabelPolicy> {
    match value {
        // Empty means unset on the wire; fall back to the default policy.
        "" => Ok(InternalLabelPolicy::default()),
        "preserve" => Ok(InternalLabelPolicy::Preserve),
        "strip_on_export" => Ok(InternalLabelPolicy::StripOnExport),
        other => Err(ChainError::invalid_config(format!(
            "unknown internal label policy '{}'",
            other
        ))),
    }
}

impl From<&GlobalSettings> for v1::GlobalSettings {
    fn from(settings: &GlobalSettings) -> Self {
        Self {
            sampling_seed_source: settings.sampling_seed_source.clone(),
            internal_label_policy: policy_to_wire(settings.internal_label_policy),
        }
    }
}

impl TryFrom<v1::GlobalSettings> for GlobalSettings {
    type Error = ChainError;

    fn try_from(wire: v1::GlobalSettings) -> ChainResult<Self> {
        let defaults = GlobalSettings::default();
        let sampling_seed_source = if wire.sampling_seed_source.is_empty() {
            defaults.sampling_seed_source
        } else {
            wire.sampling_seed_source
        };
        Ok(Self {
            sampling_seed_source,
            internal_label_policy: policy_from_wire(&wire.internal_label_policy)?,
        })
    }
}

impl From<&CircuitBreakerConfig> for v1::CircuitBreakerConfig {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            error_threshold_percentage: u32::from(config.error_threshold_percentage),
            open_state_seconds: config.open_state_seconds,
            half_open_request_threshold: config.half_open_request_threshold,
        }
    }
}

impl TryFrom<v1::CircuitBreakerConfig> for CircuitBreakerConfig {
    type Error = ChainError;

    fn try_from(wire: v1::CircuitBreakerConfig) -> ChainResult<Self> {
        let error_threshold_percentage =
            u8::try_from(wire.error_threshold_percentage).map_err(|_| {
                ChainError::invalid_config(format!(
                    "error threshold percentage {} out of range",
                    wire.error_threshold_percentage
                ))
            })?;
        Ok(Self {
            error_threshold_percentage,
            open_state_seconds: wire.open_state_seconds,
            half_open_request_threshold: wire.half_open_request_threshold,
        })
    }
}

impl TryFrom<&FbConfig> for v1::FbConfig {
    type Error = ChainError;

    fn try_from(config: &FbConfig) -> ChainResult<Self> {
        let parameters = serde_json::to_vec(&config.parameters).map_err(|e| {
            ChainError::serialization_with_source("failed to encode block parameters", e)
        })?;
        Ok(Self {
            enabled: config.enabled,
            image_tag: config.image_tag.clone(),
            parameters,
            circuit_breaker: Some(v1::CircuitBreakerConfig::from(&config.circuit_breaker)),
        })
    }
}

impl TryFrom<v1::FbConfig> for FbConfig {
    type Error = ChainError;

    fn try_from(wire: v1::FbConfig) -> ChainResult<Self> {
        let parameters = if wire.parameters.is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_slice(&wire.parameters).map_err(|e| {
                ChainError::invalid_config_with_source("block parameters are not valid JSON", e)
            })?
        };
        let circuit_breaker = match wire.circuit_breaker {
            Some(breaker) => CircuitBreakerConfig::try_from(breaker)?,
            None => CircuitBreakerConfig::default(),
        };
        let image_tag = if wire.image_tag.is_empty() {
            FbConfig::default().image_tag
        } else {
            wire.image_tag
        };
        Ok(Self {
            enabled: wire.enabled,
            image_tag,
            parameters,
            circuit_breaker,
        })
    }
}

impl TryFrom<&PipelineConfig> for v1::PipelineConfig {
    type Error = ChainError;

    fn try_from(config: &PipelineConfig) -> ChainResult<Self> {
        let mut function_blocks = HashMap::with_capacity(config.function_blocks.len());
        for (name, block) in &config.function_blocks {
            function_blocks.insert(name.clone(), v1::FbConfig::try_from(block)?);
        }
        Ok(Self {
            generation: config.generation,
            pipeline_version: config.pipeline_version.clone(),
            global: Some(v1::GlobalSettings::from(&config.global)),
            function_blocks,
        })
    }
}

impl TryFrom<v1::PipelineConfig> for PipelineConfig {
    type Error = ChainError;

    fn try_from(wire: v1::PipelineConfig) -> ChainResult<Self> {
        let global = match wire.global {
            Some(global) => GlobalSettings::try_from(global)?,
            None => GlobalSettings::default(),
        };
        let mut function_blocks = HashMap::with_capacity(wire.function_blocks.len());
        for (name, block) in wire.function_blocks {
            function_blocks.insert(name, FbConfig::try_from(block)?);
        }
        Ok(Self {
            generation: wire.generation,
            pipeline_version: wire.pipeline_version,
            global,
            function_blocks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_batch() -> MetricBatch {
        let mut batch = MetricBatch::new(b"payload".to_vec(), "otlp")
            .with_batch_id("b-42")
            .with_generation(9)
            .with_metadata("tenant", "acme");
        batch.annotate_failure("fb-en", ErrorCode::ErrProcessingFailed, "boom");
        batch
    }

    #[test]
    fn test_batch_wire_round_trip() {
        let batch = sample_batch();
        let request = v1::MetricBatchRequest::from(batch.clone());
        assert_eq!(request.batch_id, "b-42");
        assert_eq!(request.config_generation, 9);
        assert_eq!(request.internal_labels["fb_sender"], "fb-en");

        let decoded = MetricBatch::from(request);
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_error_result_onto_the_wire() {
        let result = ProcessResult::error("b-1", ErrorCode::ErrInvalidInput, "missing field");
        let response = v1::MetricBatchResponse::from(result);
        assert_eq!(response.status(), v1::PushStatus::Error);
        assert_eq!(response.error_code(), v1::ErrorCode::ErrInvalidInput);
        assert_eq!(response.error_message, "missing field");
        assert_eq!(response.batch_id, "b-1");
    }

    #[test]
    fn test_success_response_back_to_domain() {
        let response = v1::MetricBatchResponse {
            status: v1::PushStatus::Success as i32,
            error_message: String::new(),
            error_code: v1::ErrorCode::ErrUnknown as i32,
            batch_id: "b-2".to_string(),
        };
        let result = ProcessResult::from(response);
        assert!(result.is_success());
        assert_eq!(result.error_code, None);
        assert_eq!(result.error_message, None);
        assert!(!result.sent_to_dlq);
    }

    #[test]
    fn test_throttled_response_back_to_domain() {
        let response = v1::MetricBatchResponse {
            status: v1::PushStatus::Throttled as i32,
            error_message: String::new(),
            error_code: v1::ErrorCode::ErrThrottled as i32,
            batch_id: "b-3".to_string(),
        };
        let result = ProcessResult::from(response);
        assert_eq!(result.status, ProcessStatus::Throttled);
        assert_eq!(result.error_code, Some(ErrorCode::ErrThrottled));
    }

    #[test]
    fn test_error_code_mapping_is_bijective() {
        let codes = [
            ErrorCode::ErrUnknown,
            ErrorCode::ErrInvalidInput,
            ErrorCode::ErrInvalidConfig,
            ErrorCode::ErrProcessingFailed,
            ErrorCode::ErrForwardingFailed,
            ErrorCode::ErrCircuitBreakerOpen,
            ErrorCode::ErrDlqSendFailed,
            ErrorCode::ErrPoisonBatch,
            ErrorCode::ErrPiiLeak,
            ErrorCode::ErrThrottled,
            ErrorCode::ErrServiceUnavailable,
            ErrorCode::ErrTimeout,
        ];
        for code in codes {
            let wire = v1::ErrorCode::from(code);
            assert_eq!(ErrorCode::from(wire), code);
            // wire names stay aligned with the domain's string form
            assert_eq!(wire.as_str_name(), code.as_str());
        }
    }

    #[test]
    fn test_pipeline_config_wire_round_trip() {
        let config = PipelineConfig::new(7, "v1.2.3")
            .with_block("fb-rx", FbConfig::default())
            .with_block(
                "fb-gw",
                FbConfig {
                    enabled: false,
                    parameters: serde_json::json!({ "schema_enforce": true, "limit": 10 }),
                    ..FbConfig::default()
                },
            );

        let wire = v1::PipelineConfig::try_from(&config).unwrap();
        assert_eq!(wire.generation, 7);
        assert_eq!(
            wire.global.as_ref().unwrap().internal_label_policy,
            "strip_on_export"
        );

        let decoded = PipelineConfig::try_from(wire).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_wire_threshold_out_of_range_is_rejected() {
        let wire = v1::CircuitBreakerConfig {
            error_threshold_percentage: 300,
            open_state_seconds: 10,
            half_open_request_threshold: 2,
        };
        let err = CircuitBreakerConfig::try_from(wire).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_wire_defaults_fill_in_missing_pieces() {
        let wire = v1::FbConfig {
            enabled: true,
            image_tag: String::new(),
            parameters: Vec::new(),
            circuit_breaker: None,
        };
        let config = FbConfig::try_from(wire).unwrap();
        assert_eq!(config.image_tag, "latest");
        assert_eq!(config.parameters, serde_json::json!({}));
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
    }

    #[test]
    fn test_unknown_policy_string_is_rejected() {
        let wire = v1::GlobalSettings {
            sampling_seed_source: String::new(),
            internal_label_policy: "drop_everything".to_string(),
        };
        assert!(GlobalSettings::try_from(wire).is_err());

        let wire = v1::GlobalSettings {
            sampling_seed_source: String::new(),
            internal_label_policy: String::new(),
        };
        let settings = GlobalSettings::try_from(wire).unwrap();
        assert_eq!(settings.sampling_seed_source, "batch_id");
        assert_eq!(
            settings.internal_label_policy,
            InternalLabelPolicy::StripOnExport
        );
    }
}
