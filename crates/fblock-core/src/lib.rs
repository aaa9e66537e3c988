//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! fblock pipeline core
//!
//! Shared foundation for the function-block pipeline: the batch/result data
//! contract, the closed error-code set, the stage lifecycle trait with its
//! composition scaffolding, the circuit breaker, and the pipeline
//! configuration model distributed by the controller.
//!
//! Stage implementations and the RPC plumbing live in `fblock-runtime`; this
//! crate stays transport-free.

pub mod block;
pub mod config;
pub mod error;
pub mod metrics;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use block::{
    AppliedConfig, ConfigApplied, ConfigHandle, FunctionBlock, FunctionBlockBase, ReplayGuard,
};
pub use config::{FbConfig, GlobalSettings, InternalLabelPolicy, PipelineConfig};
pub use error::{ChainError, ChainResult};
pub use metrics::StageMetrics;
pub use types::{
    ErrorCode, MetricBatch, ProcessResult, ProcessStatus, LABEL_ERROR, LABEL_ERROR_CODE,
    LABEL_FB_SENDER, LABEL_REPLAY_COUNT,
};
pub use utils::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryPolicy};

/// Crate version
pub const FBLOCK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chain-push listen address for a stage process
pub const DEFAULT_PUSH_ADDR: &str = "0.0.0.0:7501";

/// Default admin (probes + metrics) listen address for a stage process
pub const DEFAULT_ADMIN_ADDR: &str = "0.0.0.0:7511";

/// Default config controller listen address
pub const DEFAULT_CONTROLLER_ADDR: &str = "0.0.0.0:7500";

/// Default config controller endpoint as dialed by stages
pub const DEFAULT_CONTROLLER_ENDPOINT: &str = "http://127.0.0.1:7500";
