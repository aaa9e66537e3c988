//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Error types for the fblock pipeline
//!
//! This module provides the main error type used throughout the pipeline,
//! with a total mapping into the closed wire error-code set.

use std::error::Error as StdError;

use thiserror::Error;

use crate::types::ErrorCode;

/// Result type for pipeline operations
pub type ChainResult<T> = Result<T, ChainError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum ChainError {
    /// Malformed or schema-violating batch content
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Invalid or unparseable pipeline configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Stage-local processing failure
    #[error("Processing error: {message}")]
    Processing {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Failure pushing a batch to the downstream stage
    #[error("Forwarding error: {message}")]
    Forwarding {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Fail-fast rejection while the circuit breaker is open
    #[error("Circuit breaker open: {message}")]
    CircuitOpen { message: String },

    /// Failure handing a batch off to the DLQ stage
    #[error("DLQ hand-off error: {message}")]
    DlqSend {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Batch that exhausted its replay budget
    #[error("Poison batch: {message}")]
    Poison { message: String },

    /// Personally identifiable information detected in a payload
    #[error("PII detected: {message}")]
    PiiLeak { message: String },

    /// Downstream is shedding load
    #[error("Throttled: {message}")]
    Throttled { message: String },

    /// Stage or peer is not ready to accept work
    #[error("Service unavailable: {message}")]
    Unavailable { message: String },

    /// Deadline elapsed or the operation was cancelled
    #[error("Timeout: {message}")]
    Timeout { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Network and transport errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl ChainError {
    /// Create an invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        ChainError::InvalidInput {
            message: message.into(),
            source: None,
        }
    }

    /// Create an invalid-input error with source
    pub fn invalid_input_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        ChainError::InvalidInput {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid-configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        ChainError::InvalidConfig {
            message: message.into(),
            source: None,
        }
    }

    /// Create an invalid-configuration error with source
    pub fn invalid_config_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        ChainError::InvalidConfig {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a processing error
    pub fn processing(message: impl Into<String>) -> Self {
        ChainError::Processing {
            message: message.into(),
            source: None,
        }
    }

    /// Create a processing error with source
    pub fn processing_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        ChainError::Processing {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a forwarding error
    pub fn forwarding(message: impl Into<String>) -> Self {
        ChainError::Forwarding {
            message: message.into(),
            source: None,
        }
    }

    /// Create a forwarding error with source
    pub fn forwarding_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        ChainError::Forwarding {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a circuit-open error
    pub fn circuit_open(message: impl Into<String>) -> Self {
        ChainError::CircuitOpen {
            message: message.into(),
        }
    }

    /// Create a DLQ hand-off error
    pub fn dlq_send(message: impl Into<String>) -> Self {
        ChainError::DlqSend {
            message: message.into(),
            source: None,
        }
    }

    /// Create a DLQ hand-off error with source
    pub fn dlq_send_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        ChainError::DlqSend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a poison-batch error
    pub fn poison(message: impl Into<String>) -> Self {
        ChainError::Poison {
            message: message.into(),
        }
    }

    /// Create a PII error
    pub fn pii_leak(message: impl Into<String>) -> Self {
        ChainError::PiiLeak {
            message: message.into(),
        }
    }

    /// Create a throttled error
    pub fn throttled(message: impl Into<String>) -> Self {
        ChainError::Throttled {
            message: message.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        ChainError::Unavailable {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        ChainError::Timeout {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        ChainError::Serialization {
            message: message.into(),
            source: None,
        }
    }

    /// Create a serialization error with source
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        ChainError::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        ChainError::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        ChainError::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        ChainError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with source
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        ChainError::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if the error is retryable by the caller under breaker gating
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::Network { .. }
                | ChainError::Timeout { .. }
                | ChainError::Unavailable { .. }
                | ChainError::Throttled { .. }
                | ChainError::Forwarding { .. }
        )
    }

    /// Check if the error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::Network { .. }
                | ChainError::Timeout { .. }
                | ChainError::Unavailable { .. }
                | ChainError::Throttled { .. }
        )
    }

    /// Check if the error is permanent (never retried, routed to the DLQ)
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidInput { .. }
                | ChainError::InvalidConfig { .. }
                | ChainError::Poison { .. }
                | ChainError::PiiLeak { .. }
                | ChainError::Serialization { .. }
        )
    }

    /// Map the error into the closed wire code set
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ChainError::InvalidInput { .. } => ErrorCode::ErrInvalidInput,
            ChainError::InvalidConfig { .. } => ErrorCode::ErrInvalidConfig,
            ChainError::Processing { .. } => ErrorCode::ErrProcessingFailed,
            ChainError::Forwarding { .. } => ErrorCode::ErrForwardingFailed,
            ChainError::CircuitOpen { .. } => ErrorCode::ErrCircuitBreakerOpen,
            ChainError::DlqSend { .. } => ErrorCode::ErrDlqSendFailed,
            ChainError::Poison { .. } => ErrorCode::ErrPoisonBatch,
            ChainError::PiiLeak { .. } => ErrorCode::ErrPiiLeak,
            ChainError::Throttled { .. } => ErrorCode::ErrThrottled,
            ChainError::Unavailable { .. } => ErrorCode::ErrServiceUnavailable,
            ChainError::Timeout { .. } => ErrorCode::ErrTimeout,
            ChainError::Serialization { .. } => ErrorCode::ErrProcessingFailed,
            ChainError::Network { .. } => ErrorCode::ErrServiceUnavailable,
            ChainError::Internal { .. } => ErrorCode::ErrUnknown,
        }
    }

    /// Get the error type as a string
    pub fn error_type(&self) -> &'static str {
        match self {
            ChainError::InvalidInput { .. } => "InvalidInput",
            ChainError::InvalidConfig { .. } => "InvalidConfig",
            ChainError::Processing { .. } => "Processing",
            ChainError::Forwarding { .. } => "Forwarding",
            ChainError::CircuitOpen { .. } => "CircuitOpen",
            ChainError::DlqSend { .. } => "DlqSend",
            ChainError::Poison { .. } => "Poison",
            ChainError::PiiLeak { .. } => "PiiLeak",
            ChainError::Throttled { .. } => "Throttled",
            ChainError::Unavailable { .. } => "Unavailable",
            ChainError::Timeout { .. } => "Timeout",
            ChainError::Serialization { .. } => "Serialization",
            ChainError::Network { .. } => "Network",
            ChainError::Internal { .. } => "Internal",
        }
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::serialization_with_source("JSON encoding failed", err)
    }
}
