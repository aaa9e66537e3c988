//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Shared stage scaffolding
//!
//! Every stage variant composes a `FunctionBlockBase`: the copy-on-write
//! config snapshot, the circuit breaker, the replay guard, and the
//! readiness/drain flags. Config application is serialized here and enforces
//! generation ordering; the processing path only ever loads a snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::block::replay_guard::ReplayGuard;
use crate::block::snapshot::{AppliedConfig, ConfigHandle};
use crate::config::{FbConfig, PipelineConfig};
use crate::error::{ChainError, ChainResult};
use crate::types::MetricBatch;
use crate::utils::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

/// Outcome of one `apply_config` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigApplied {
    /// The candidate generation was published.
    Applied,
    /// An equal or higher generation was already active; nothing changed.
    AlreadyCurrent,
}

/// Composition target carrying the lifecycle state every stage shares.
pub struct FunctionBlockBase<P> {
    name: String,
    config: ConfigHandle<P>,
    breaker: CircuitBreaker,
    replay_guard: ReplayGuard,
    initialized: AtomicBool,
    draining: AtomicBool,
    update_lock: Mutex<()>,
}

impl<P: Send + Sync> FunctionBlockBase<P> {
    /// Create the scaffolding for a named stage.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let breaker = CircuitBreaker::new(name.clone(), CircuitBreakerConfig::default());
        Self {
            name,
            config: ConfigHandle::new(),
            breaker,
            replay_guard: ReplayGuard::default(),
            initialized: AtomicBool::new(false),
            draining: AtomicBool::new(false),
            update_lock: Mutex::new(()),
        }
    }

    /// Stage name, matching its key in the pipeline config.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker guarding this stage's outbound dependency.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Current config snapshot; processing takes exactly one per batch.
    pub fn snapshot(&self) -> Option<Arc<AppliedConfig<P>>> {
        self.config.snapshot()
    }

    /// Generation of the applied configuration, if any.
    pub fn generation(&self) -> Option<u64> {
        self.config.generation()
    }

    /// Mark resource initialization complete.
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Ready means initialized, enabled by config, holding a snapshot, and
    /// not draining.
    pub fn is_ready(&self) -> bool {
        if !self.initialized.load(Ordering::SeqCst) || self.draining.load(Ordering::SeqCst) {
            return false;
        }
        self.config
            .snapshot()
            .map(|snap| snap.fb.enabled)
            .unwrap_or(false)
    }

    /// Flip into draining; returns false when already draining so shutdown
    /// stays idempotent.
    pub fn begin_drain(&self) -> bool {
        !self.draining.swap(true, Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// True when a replayed batch already completed here and its side effects
    /// must not be repeated.
    pub fn replay_already_done(&self, batch: &MetricBatch) -> bool {
        batch.replay && self.replay_guard.contains(&batch.batch_id)
    }

    /// Record a completed batch for replay idempotence.
    pub fn record_completed(&self, batch_id: &str) {
        self.replay_guard.record(batch_id);
    }

    /// Parse, validate, and publish a serialized `PipelineConfig`.
    ///
    /// All-or-nothing: nothing becomes visible until the whole candidate
    /// (including the stage-specific `parse` step) validated. Publications
    /// are serialized; a candidate at or below the applied generation is a
    /// no-op so re-delivery is tolerated and a lower generation can never
    /// follow a higher one.
    pub async fn apply_config<F>(
        &self,
        raw: &[u8],
        generation: u64,
        parse: F,
    ) -> ChainResult<ConfigApplied>
    where
        F: FnOnce(&PipelineConfig, &FbConfig) -> ChainResult<P> + Send,
    {
        let pipeline: PipelineConfig = serde_json::from_slice(raw).map_err(|e| {
            ChainError::invalid_config_with_source("could not parse pipeline config", e)
        })?;
        if pipeline.generation != generation {
            return Err(ChainError::invalid_config(format!(
                "generation mismatch: envelope says {} but config says {}",
                generation, pipeline.generation
            )));
        }
        pipeline.validate()?;
        let fb = pipeline.block(&self.name).cloned().ok_or_else(|| {
            ChainError::invalid_config(format!(
                "pipeline config has no entry for stage '{}'",
                self.name
            ))
        })?;
        let params = parse(&pipeline, &fb)?;

        let _guard = self.update_lock.lock().await;
        if let Some(current) = self.config.snapshot() {
            if current.generation >= generation {
                debug!(
                    "Stage '{}' ignoring generation {} (already at {})",
                    self.name, generation, current.generation
                );
                return Ok(ConfigApplied::AlreadyCurrent);
            }
        }
        self.breaker.update_config(fb.circuit_breaker);
        let enabled = fb.enabled;
        self.config.store(AppliedConfig {
            generation,
            global: pipeline.global.clone(),
            fb,
            params,
        });
        info!(
            "Stage '{}' applied configuration generation {} (enabled: {})",
            self.name, generation, enabled
        );
        Ok(ConfigApplied::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalSettings;

    fn create_test_pipeline(generation: u64) -> PipelineConfig {
        PipelineConfig {
            generation,
            pipeline_version: "v1".to_string(),
            global: GlobalSettings::default(),
            function_blocks: [("fb-test".to_string(), FbConfig::default())]
                .into_iter()
                .collect(),
        }
    }

    fn encode(config: &PipelineConfig) -> Vec<u8> {
        serde_json::to_vec(config).unwrap()
    }

    async fn apply(base: &FunctionBlockBase<()>, generation: u64) -> ChainResult<ConfigApplied> {
        let raw = encode(&create_test_pipeline(generation));
        base.apply_config(&raw, generation, |_, _| Ok(())).await
    }

    #[tokio::test]
    async fn test_ready_needs_init_and_config() {
        let base: FunctionBlockBase<()> = FunctionBlockBase::new("fb-test");
        assert!(!base.is_ready());

        base.mark_initialized();
        assert!(!base.is_ready());

        apply(&base, 1).await.unwrap();
        assert!(base.is_ready());
        assert_eq!(base.generation(), Some(1));
    }

    #[tokio::test]
    async fn test_lower_generation_is_a_no_op() {
        let base: FunctionBlockBase<()> = FunctionBlockBase::new("fb-test");
        assert_eq!(apply(&base, 5).await.unwrap(), ConfigApplied::Applied);
        assert_eq!(apply(&base, 3).await.unwrap(), ConfigApplied::AlreadyCurrent);
        assert_eq!(apply(&base, 5).await.unwrap(), ConfigApplied::AlreadyCurrent);
        assert_eq!(base.generation(), Some(5));
    }

    #[tokio::test]
    async fn test_concurrent_generations_settle_on_the_higher() {
        let base: Arc<FunctionBlockBase<()>> = Arc::new(FunctionBlockBase::new("fb-test"));
        let five = {
            let base = base.clone();
            tokio::spawn(async move { apply(&base, 5).await })
        };
        let six = {
            let base = base.clone();
            tokio::spawn(async move { apply(&base, 6).await })
        };
        five.await.unwrap().unwrap();
        six.await.unwrap().unwrap();

        // whichever interleaving won, the final generation is 6
        assert_eq!(base.generation(), Some(6));
        assert_eq!(apply(&base, 5).await.unwrap(), ConfigApplied::AlreadyCurrent);
        assert_eq!(base.generation(), Some(6));
    }

    #[tokio::test]
    async fn test_invalid_candidate_keeps_previous_config() {
        let base: FunctionBlockBase<()> = FunctionBlockBase::new("fb-test");
        apply(&base, 2).await.unwrap();

        // unparseable payload
        let err = base
            .apply_config(b"not json", 3, |_, _| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidConfig { .. }));
        assert_eq!(base.generation(), Some(2));

        // stage-specific parse failure is just as atomic
        let raw = encode(&create_test_pipeline(4));
        let err = base
            .apply_config(&raw, 4, |_, _| {
                Err(ChainError::invalid_config("bad stage params"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidConfig { .. }));
        assert_eq!(base.generation(), Some(2));
    }

    #[tokio::test]
    async fn test_missing_stage_entry_is_rejected() {
        let base: FunctionBlockBase<()> = FunctionBlockBase::new("fb-absent");
        let raw = encode(&create_test_pipeline(1));
        let err = base.apply_config(&raw, 1, |_, _| Ok(())).await.unwrap_err();
        assert!(err.to_string().contains("fb-absent"));
    }

    #[tokio::test]
    async fn test_generation_mismatch_is_rejected() {
        let base: FunctionBlockBase<()> = FunctionBlockBase::new("fb-test");
        let raw = encode(&create_test_pipeline(7));
        let err = base.apply_config(&raw, 8, |_, _| Ok(())).await.unwrap_err();
        assert!(matches!(err, ChainError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_disabled_stage_is_not_ready() {
        let base: FunctionBlockBase<()> = FunctionBlockBase::new("fb-test");
        base.mark_initialized();

        let mut pipeline = create_test_pipeline(1);
        pipeline.function_blocks.get_mut("fb-test").unwrap().enabled = false;
        base.apply_config(&encode(&pipeline), 1, |_, _| Ok(()))
            .await
            .unwrap();
        assert!(!base.is_ready());
    }

    #[tokio::test]
    async fn test_drain_is_idempotent_and_blocks_ready() {
        let base: FunctionBlockBase<()> = FunctionBlockBase::new("fb-test");
        base.mark_initialized();
        apply(&base, 1).await.unwrap();
        assert!(base.is_ready());

        assert!(base.begin_drain());
        assert!(!base.begin_drain());
        assert!(!base.is_ready());
    }

    #[tokio::test]
    async fn test_replay_guard_only_applies_to_replays() {
        let base: FunctionBlockBase<()> = FunctionBlockBase::new("fb-test");
        let first = MetricBatch::new(vec![], "otlp").with_batch_id("b-1");
        assert!(!base.replay_already_done(&first));

        base.record_completed("b-1");
        // same id, not flagged as replay: processed normally
        assert!(!base.replay_already_done(&first));
        let replayed = first.clone().for_replay();
        assert!(base.replay_already_done(&replayed));
    }
}
