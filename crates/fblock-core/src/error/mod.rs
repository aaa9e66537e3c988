//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Error handling for the fblock pipeline
//!
//! Structured error types with a total mapping into the closed wire code set,
//! plus the retryability classification used by the forwarding path.

pub mod types;

// Re-export commonly used types
pub use types::{ChainError, ChainResult};
