//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Retry policy for transient chain failures
//!
//! Bounded attempts with exponential backoff and jitter. Permanent errors
//! short-circuit: only errors the taxonomy classifies as retryable are
//! attempted again.

use std::future::Future;

use tokio::time::Duration;
use tracing::debug;

use crate::error::{ChainError, ChainResult};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier applied per attempt
    pub backoff_multiplier: f64,

    /// Enable jitter
    pub enable_jitter: bool,

    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            enable_jitter: true,
            jitter_factor: 0.1,
        }
    }
}

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an operation, retrying transient failures with backoff.
    ///
    /// Non-retryable errors are returned immediately; the last error is
    /// returned once the attempt budget is exhausted.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> ChainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ChainResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.config.max_attempts || !err.is_retryable() {
                        return Err(err);
                    }
                    let delay = self.calculate_delay(attempt);
                    debug!(
                        "Retry attempt {} after {:?} delay: {}",
                        attempt, delay, err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Backoff duration before the given (1-based) retry attempt.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.config.initial_backoff_ms as f64
            * self.config.backoff_multiplier.powi((attempt - 1) as i32);
        let base_delay = delay_ms.min(self.config.max_backoff_ms as f64) as u64;

        let final_delay = if self.config.enable_jitter {
            let jitter = (base_delay as f64
                * self.config.jitter_factor
                * (rand::random::<f64>() * 2.0 - 1.0)) as i64;
            (base_delay as i64 + jitter).max(1) as u64
        } else {
            base_delay
        };

        Duration::from_millis(final_delay)
    }
}
