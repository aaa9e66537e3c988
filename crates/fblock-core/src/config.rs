//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Pipeline configuration model
//!
//! The controller publishes a `PipelineConfig` tree under a monotonically
//! increasing generation; stages select their own entry by name. A published
//! generation is immutable: every operator change produces a new, higher
//! generation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, ChainResult};
use crate::utils::circuit_breaker::CircuitBreakerConfig;

/// Handling of internal labels when a batch leaves the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalLabelPolicy {
    /// Internal labels stay on the exported payload.
    Preserve,
    /// The gateway removes internal labels before export.
    #[default]
    StripOnExport,
}

/// Pipeline-wide policy shared by every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Source used to derive deterministic sampling seeds.
    #[serde(default = "default_seed_source")]
    pub sampling_seed_source: String,

    /// Internal-label handling at the export boundary.
    #[serde(default)]
    pub internal_label_policy: InternalLabelPolicy,
}

fn default_seed_source() -> String {
    "batch_id".to_string()
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            sampling_seed_source: default_seed_source(),
            internal_label_policy: InternalLabelPolicy::default(),
        }
    }
}

/// Per-stage deployment and runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FbConfig {
    /// A disabled stage keeps its applied config but stops accepting batches.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Deployment image tag; carried for provenance, not acted on here.
    #[serde(default = "default_image_tag")]
    pub image_tag: String,

    /// Opaque stage-specific parameters, interpreted only by the owning stage.
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,

    /// Breaker thresholds for the stage's outbound dependency.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_image_tag() -> String {
    "latest".to_string()
}

fn default_parameters() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for FbConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            image_tag: default_image_tag(),
            parameters: default_parameters(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl FbConfig {
    /// Validate the per-stage settings.
    pub fn validate(&self) -> ChainResult<()> {
        self.circuit_breaker.validate()
    }
}

/// The full configuration tree distributed by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Monotonically increasing generation; the controller never decreases it.
    #[serde(default)]
    pub generation: u64,

    /// Compatibility tag for the pipeline release.
    pub pipeline_version: String,

    /// Policy shared across stages.
    #[serde(default)]
    pub global: GlobalSettings,

    /// Stage configurations keyed by function-block name.
    #[serde(default)]
    pub function_blocks: HashMap<String, FbConfig>,
}

impl PipelineConfig {
    /// Create an empty config under the given generation.
    pub fn new(generation: u64, pipeline_version: impl Into<String>) -> Self {
        Self {
            generation,
            pipeline_version: pipeline_version.into(),
            global: GlobalSettings::default(),
            function_blocks: HashMap::new(),
        }
    }

    /// Add or replace one stage entry.
    pub fn with_block(mut self, name: impl Into<String>, config: FbConfig) -> Self {
        self.function_blocks.insert(name.into(), config);
        self
    }

    /// Look up the entry for a stage.
    pub fn block(&self, name: &str) -> Option<&FbConfig> {
        self.function_blocks.get(name)
    }

    /// Validate the whole tree.
    pub fn validate(&self) -> ChainResult<()> {
        if self.generation == 0 {
            return Err(ChainError::invalid_config("generation must be positive"));
        }
        if self.pipeline_version.trim().is_empty() {
            return Err(ChainError::invalid_config("pipeline_version is required"));
        }
        for (name, block) in &self.function_blocks {
            if name.trim().is_empty() {
                return Err(ChainError::invalid_config(
                    "function block names must not be empty",
                ));
            }
            block.validate().map_err(|e| {
                ChainError::invalid_config(format!("function block '{}': {}", name, e))
            })?;
        }
        Ok(())
    }
}
