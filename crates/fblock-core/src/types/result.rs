//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Processing outcome model
//!
//! Every batch handed to a stage produces a `ProcessResult`, whether the
//! stage succeeded, failed, or shed load. Failure codes form a closed set so
//! operators and upstream stages can switch on them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome classification for one processed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Outcome not determined (protocol default, never produced deliberately).
    #[default]
    Unknown,
    /// The stage processed and forwarded/exported the batch.
    Success,
    /// The stage failed; `error_code` carries the classification.
    Error,
    /// The stage is shedding load; the sender should back off and retry,
    /// not treat the batch as failed.
    Throttled,
}

impl ProcessStatus {
    /// Stable lowercase name, used as a metrics label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Unknown => "unknown",
            ProcessStatus::Success => "success",
            ProcessStatus::Error => "error",
            ProcessStatus::Throttled => "throttled",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of wire-visible failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ErrUnknown,
    ErrInvalidInput,
    ErrInvalidConfig,
    ErrProcessingFailed,
    ErrForwardingFailed,
    ErrCircuitBreakerOpen,
    ErrDlqSendFailed,
    ErrPoisonBatch,
    ErrPiiLeak,
    ErrThrottled,
    ErrServiceUnavailable,
    ErrTimeout,
}

impl ErrorCode {
    /// Wire name of the code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ErrUnknown => "ERR_UNKNOWN",
            ErrorCode::ErrInvalidInput => "ERR_INVALID_INPUT",
            ErrorCode::ErrInvalidConfig => "ERR_INVALID_CONFIG",
            ErrorCode::ErrProcessingFailed => "ERR_PROCESSING_FAILED",
            ErrorCode::ErrForwardingFailed => "ERR_FORWARDING_FAILED",
            ErrorCode::ErrCircuitBreakerOpen => "ERR_CIRCUIT_BREAKER_OPEN",
            ErrorCode::ErrDlqSendFailed => "ERR_DLQ_SEND_FAILED",
            ErrorCode::ErrPoisonBatch => "ERR_POISON_BATCH",
            ErrorCode::ErrPiiLeak => "ERR_PII_LEAK",
            ErrorCode::ErrThrottled => "ERR_THROTTLED",
            ErrorCode::ErrServiceUnavailable => "ERR_SERVICE_UNAVAILABLE",
            ErrorCode::ErrTimeout => "ERR_TIMEOUT",
        }
    }

    /// Parse a wire name back into a code.
    pub fn parse(name: &str) -> Option<Self> {
        let code = match name {
            "ERR_UNKNOWN" => ErrorCode::ErrUnknown,
            "ERR_INVALID_INPUT" => ErrorCode::ErrInvalidInput,
            "ERR_INVALID_CONFIG" => ErrorCode::ErrInvalidConfig,
            "ERR_PROCESSING_FAILED" => ErrorCode::ErrProcessingFailed,
            "ERR_FORWARDING_FAILED" => ErrorCode::ErrForwardingFailed,
            "ERR_CIRCUIT_BREAKER_OPEN" => ErrorCode::ErrCircuitBreakerOpen,
            "ERR_DLQ_SEND_FAILED" => ErrorCode::ErrDlqSendFailed,
            "ERR_POISON_BATCH" => ErrorCode::ErrPoisonBatch,
            "ERR_PII_LEAK" => ErrorCode::ErrPiiLeak,
            "ERR_THROTTLED" => ErrorCode::ErrThrottled,
            "ERR_SERVICE_UNAVAILABLE" => ErrorCode::ErrServiceUnavailable,
            "ERR_TIMEOUT" => ErrorCode::ErrTimeout,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured outcome of processing one batch at one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Outcome classification.
    pub status: ProcessStatus,

    /// Failure code, set when `status` is `Error` (and `ERR_THROTTLED` when
    /// `Throttled`).
    pub error_code: Option<ErrorCode>,

    /// Human-readable failure detail.
    pub error_message: Option<String>,

    /// Id of the batch this result describes.
    pub batch_id: String,

    /// True iff this stage handed the batch to the DLQ and the hand-off
    /// succeeded.
    pub sent_to_dlq: bool,
}

impl ProcessResult {
    /// Successful outcome for a batch.
    pub fn success(batch_id: impl Into<String>) -> Self {
        Self {
            status: ProcessStatus::Success,
            error_code: None,
            error_message: None,
            batch_id: batch_id.into(),
            sent_to_dlq: false,
        }
    }

    /// Failed outcome with a classification code.
    pub fn error(
        batch_id: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: ProcessStatus::Error,
            error_code: Some(code),
            error_message: Some(message.into()),
            batch_id: batch_id.into(),
            sent_to_dlq: false,
        }
    }

    /// Load-shedding outcome; the sender should back off and retry.
    pub fn throttled(batch_id: impl Into<String>) -> Self {
        Self {
            status: ProcessStatus::Throttled,
            error_code: Some(ErrorCode::ErrThrottled),
            error_message: None,
            batch_id: batch_id.into(),
            sent_to_dlq: false,
        }
    }

    /// Record whether the batch reached the DLQ as part of this result.
    pub fn with_dlq(mut self, sent: bool) -> Self {
        self.sent_to_dlq = sent;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ProcessStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_names_round_trip() {
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
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("ERR_NOPE"), None);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let encoded = serde_json::to_string(&ErrorCode::ErrDlqSendFailed).unwrap();
        assert_eq!(encoded, "\"ERR_DLQ_SEND_FAILED\"");
        let encoded = serde_json::to_string(&ErrorCode::ErrPiiLeak).unwrap();
        assert_eq!(encoded, "\"ERR_PII_LEAK\"");
    }

    #[test]
    fn test_result_constructors() {
        let ok = ProcessResult::success("b-1");
        assert!(ok.is_success());
        assert_eq!(ok.batch_id, "b-1");
        assert!(!ok.sent_to_dlq);

        let failed = ProcessResult::error("b-2", ErrorCode::ErrInvalidInput, "bad").with_dlq(true);
        assert_eq!(failed.status, ProcessStatus::Error);
        assert_eq!(failed.error_code, Some(ErrorCode::ErrInvalidInput));
        assert!(failed.sent_to_dlq);

        let throttled = ProcessResult::throttled("b-3");
        assert_eq!(throttled.status, ProcessStatus::Throttled);
        assert_eq!(throttled.error_code, Some(ErrorCode::ErrThrottled));
    }
}
