//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Metric batch data model
//!
//! A `MetricBatch` is the unit of work handed from stage to stage. The payload
//! stays opaque to the pipeline; the surrounding fields carry identity,
//! provenance, and bookkeeping state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::result::ErrorCode;

/// Internal label carrying the failure message attached before a DLQ hand-off.
pub const LABEL_ERROR: &str = "error";

/// Internal label carrying the specific failure code attached before a DLQ hand-off.
pub const LABEL_ERROR_CODE: &str = "error_code";

/// Internal label identifying the stage that handed the batch off.
pub const LABEL_FB_SENDER: &str = "fb_sender";

/// Internal label counting how many times a dead-lettered batch has been replayed.
pub const LABEL_REPLAY_COUNT: &str = "replay_count";

/// A batch of encoded observability data moving through the chain.
///
/// `metadata` and `internal_labels` are deliberately separate namespaces:
/// user-facing metadata is forwarded opaquely, while internal labels belong to
/// the pipeline itself and may be stripped at the export boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    /// Unique batch identifier, stable across retries and replays.
    pub batch_id: String,

    /// Opaque serialized payload.
    pub data: Vec<u8>,

    /// Format tag describing the payload encoding (e.g. "otlp").
    pub format: String,

    /// True when the batch was re-injected from the dead-letter queue.
    #[serde(default)]
    pub replay: bool,

    /// Generation of the pipeline configuration the producing stage ran under.
    /// Provenance only, never enforced downstream.
    #[serde(default)]
    pub config_generation: u64,

    /// Free-form user-facing metadata, forwarded opaquely.
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Pipeline bookkeeping labels, kept apart from `metadata`.
    #[serde(default)]
    pub internal_labels: HashMap<String, String>,
}

impl MetricBatch {
    /// Create a batch with a generated id and empty label maps.
    pub fn new(data: Vec<u8>, format: impl Into<String>) -> Self {
        Self {
            batch_id: Uuid::new_v4().to_string(),
            data,
            format: format.into(),
            replay: false,
            config_generation: 0,
            metadata: HashMap::new(),
            internal_labels: HashMap::new(),
        }
    }

    /// Replace the generated batch id.
    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = batch_id.into();
        self
    }

    /// Record the configuration generation the producer operated under.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.config_generation = generation;
        self
    }

    /// Attach one user-facing metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark the batch as a DLQ replay.
    pub fn for_replay(mut self) -> Self {
        self.replay = true;
        self
    }

    /// Size of the encoded payload in bytes.
    pub fn payload_size(&self) -> usize {
        self.data.len()
    }

    /// Attach the standard failure annotations ahead of a DLQ hand-off.
    pub fn annotate_failure(&mut self, sender: &str, code: ErrorCode, message: &str) {
        self.internal_labels
            .insert(LABEL_ERROR.to_string(), message.to_string());
        self.internal_labels
            .insert(LABEL_ERROR_CODE.to_string(), code.as_str().to_string());
        self.internal_labels
            .insert(LABEL_FB_SENDER.to_string(), sender.to_string());
    }

    /// Replay attempt count stamped on the batch, zero when absent.
    pub fn replay_count(&self) -> u32 {
        self.internal_labels
            .get(LABEL_REPLAY_COUNT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Stamp the replay attempt count onto the batch.
    pub fn set_replay_count(&mut self, count: u32) {
        self.internal_labels
            .insert(LABEL_REPLAY_COUNT.to_string(), count.to_string());
    }
}
