//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Copy-on-write configuration snapshot
//!
//! Readers load the current snapshot with a single atomic reference load and
//! never take a lock; writers build the replacement off to the side and
//! publish it with one pointer swap (serialized by the stage base).

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::config::{FbConfig, GlobalSettings};

/// One applied configuration generation, as seen by a stage.
///
/// `params` is the stage-specific view parsed out of `fb.parameters` during
/// apply, so the processing path never re-parses per batch.
#[derive(Debug)]
pub struct AppliedConfig<P> {
    /// Generation this snapshot was published under.
    pub generation: u64,

    /// Pipeline-wide policy at that generation.
    pub global: GlobalSettings,

    /// This stage's entry from the configuration tree.
    pub fb: FbConfig,

    /// Parsed stage-specific parameters.
    pub params: P,
}

/// Lock-free holder of the current `AppliedConfig` snapshot.
pub struct ConfigHandle<P> {
    current: ArcSwapOption<AppliedConfig<P>>,
}

impl<P> ConfigHandle<P> {
    /// Create an empty handle; the stage is not ready until a snapshot lands.
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::from(None),
        }
    }

    /// Load the current snapshot without locking.
    pub fn snapshot(&self) -> Option<Arc<AppliedConfig<P>>> {
        self.current.load_full()
    }

    /// Generation of the current snapshot, if any.
    pub fn generation(&self) -> Option<u64> {
        self.current.load().as_ref().map(|c| c.generation)
    }

    /// Publish a replacement snapshot. Callers serialize publications and
    /// enforce generation ordering before storing.
    pub fn store(&self, snapshot: AppliedConfig<P>) -> Arc<AppliedConfig<P>> {
        let snapshot = Arc::new(snapshot);
        self.current.store(Some(snapshot.clone()));
        snapshot
    }
}

impl<P> Default for ConfigHandle<P> {
    fn default() -> Self {
        Self::new()
    }
}
