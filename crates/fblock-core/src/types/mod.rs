//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Shared data contract flowing between stages
//!
//! This module defines the batch and result types every stage exchanges,
//! together with the closed error-code set used on the wire.

pub mod batch;
pub mod result;

// Re-export commonly used types
pub use batch::{
    MetricBatch, LABEL_ERROR, LABEL_ERROR_CODE, LABEL_FB_SENDER, LABEL_REPLAY_COUNT,
};
pub use result::{ErrorCode, ProcessResult, ProcessStatus};
