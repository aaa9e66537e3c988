//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Helpers shared by the unit tests in this crate.

use fblock_core::{FbConfig, FunctionBlock, PipelineConfig};

/// Minimal pipeline config naming the given stages.
pub fn pipeline_with(generation: u64, names: &[&str]) -> PipelineConfig {
    let mut config = PipelineConfig::new(generation, "vtest");
    for name in names {
        config = config.with_block(*name, FbConfig::default());
    }
    config
}

/// Push a minimal config at the block so it becomes ready.
pub async fn make_ready(block: &dyn FunctionBlock, generation: u64) {
    let config = pipeline_with(generation, &[block.name()]);
    let raw = serde_json::to_vec(&config).unwrap();
    block.update_config(&raw, generation).await.unwrap();
}
