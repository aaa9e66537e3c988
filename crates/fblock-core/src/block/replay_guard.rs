//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Replay idempotence guard
//!
//! Bounded record of recently succeeded batch ids. Replayed batches may be
//! redelivered, so a stage consults the guard before repeating externally
//! visible side effects for a batch id it already completed.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

/// Default number of batch ids remembered per stage instance.
pub const DEFAULT_REPLAY_WINDOW: usize = 4096;

struct GuardInner {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

/// Bounded set of batch ids that completed successfully at this stage.
pub struct ReplayGuard {
    capacity: usize,
    inner: Mutex<GuardInner>,
}

impl ReplayGuard {
    /// Create a guard remembering up to `capacity` batch ids.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(GuardInner {
                seen: HashSet::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// True when the batch id completed successfully within the window.
    pub fn contains(&self, batch_id: &str) -> bool {
        self.inner.lock().seen.contains(batch_id)
    }

    /// Record a successful completion, evicting the oldest entry when full.
    pub fn record(&self, batch_id: &str) {
        let mut inner = self.inner.lock();
        if !inner.seen.insert(batch_id.to_string()) {
            return;
        }
        inner.order.push_back(batch_id.to_string());
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
    }

    /// Number of ids currently remembered.
    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_WINDOW)
    }
}
