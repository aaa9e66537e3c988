//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Utility modules shared across stages
//!
//! Circuit breaking and retry/backoff for the forwarding and config paths.

pub mod circuit_breaker;
pub mod retry;

// Re-export commonly used types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use retry::{RetryConfig, RetryPolicy};
