//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Function block contract
//!
//! The lifecycle interface every stage implements, plus the scaffolding
//! (config snapshot, circuit breaker, replay guard) stages share via
//! composition. Stage variants differ only in their `process_batch` logic.

pub mod base;
pub mod replay_guard;
pub mod snapshot;

use async_trait::async_trait;

use crate::error::ChainResult;
use crate::types::{MetricBatch, ProcessResult};

// Re-export commonly used types
pub use base::{ConfigApplied, FunctionBlockBase};
pub use replay_guard::{ReplayGuard, DEFAULT_REPLAY_WINDOW};
pub use snapshot::{AppliedConfig, ConfigHandle};

/// Lifecycle contract shared by every stage of the chain.
#[async_trait]
pub trait FunctionBlock: Send + Sync {
    /// Stage name, matching its key in the pipeline configuration.
    fn name(&self) -> &str;

    /// Prepare resources (breaker, connections). A stage is not ready until
    /// it has also applied at least one configuration generation.
    async fn initialize(&self) -> ChainResult<()>;

    /// Process one batch. Safe to call concurrently with `update_config`;
    /// implementations observe a configuration snapshot taken at entry and
    /// never read it twice.
    async fn process_batch(&self, batch: MetricBatch) -> ChainResult<ProcessResult>;

    /// Parse, validate, and atomically apply a serialized `PipelineConfig`.
    /// On any failure the previously applied configuration stays active.
    async fn update_config(&self, config: &[u8], generation: u64) -> ChainResult<()>;

    /// True once initialized, enabled, and holding an applied configuration.
    fn ready(&self) -> bool;

    /// Cooperative shutdown: stop accepting work and release outbound
    /// connections. Safe to call more than once.
    async fn shutdown(&self) -> ChainResult<()>;
}
