//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Circuit breaker for stage-to-stage calls
//!
//! Failure-rate tripwire guarding one outbound dependency of one stage
//! instance. The rate is evaluated over the attempts recorded since the last
//! state transition; every transition resets the counters. The open state is
//! left lazily on the first call after the open window elapses, not by a
//! background timer.

use std::future::Future;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{ChainError, ChainResult};

/// Circuit breaker thresholds, distributed per stage in the pipeline config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (1-100) over attempts since the last transition
    /// that trips the breaker open.
    pub error_threshold_percentage: u8,

    /// Seconds the breaker stays open before the next call may probe.
    pub open_state_seconds: u64,

    /// Consecutive successes required to close from half-open.
    pub half_open_request_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percentage: 50,
            open_state_seconds: 30,
            half_open_request_threshold: 5,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate threshold ranges.
    pub fn validate(&self) -> ChainResult<()> {
        if !(1..=100).contains(&self.error_threshold_percentage) {
            return Err(ChainError::invalid_config(format!(
                "error_threshold_percentage must be in 1..=100, got {}",
                self.error_threshold_percentage
            )));
        }
        if self.half_open_request_threshold == 0 {
            return Err(ChainError::invalid_config(
                "half_open_request_threshold must be at least 1",
            ));
        }
        Ok(())
    }

    /// Duration of the open state.
    pub fn open_state(&self) -> Duration {
        Duration::from_secs(self.open_state_seconds)
    }
}

/// Breaker state at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls fail fast without invoking the operation.
    Open,
    /// Probing; a single failure reopens, enough successes close.
    HalfOpen,
}

impl CircuitState {
    /// Stable name used as a metrics label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Counter snapshot exposed for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    /// Attempts recorded since the last transition.
    pub attempts: u64,
    /// Failures recorded since the last transition.
    pub failures: u64,
    /// Consecutive successes while half-open.
    pub consecutive_successes: u32,
    /// Total state transitions over the breaker's lifetime.
    pub transitions: u64,
}

struct BreakerInner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    attempts: u64,
    failures: u64,
    consecutive_successes: u32,
    transitions: u64,
    entered_at: Instant,
}

impl BreakerInner {
    fn transition(&mut self, name: &str, next: CircuitState) {
        let prev = self.state;
        self.state = next;
        self.attempts = 0;
        self.failures = 0;
        self.consecutive_successes = 0;
        self.transitions += 1;
        self.entered_at = Instant::now();
        info!(
            "Circuit breaker '{}' transitioned {} -> {}",
            name,
            prev.as_str(),
            next.as_str()
        );
    }
}

/// Failure-rate circuit breaker guarding one outbound dependency.
///
/// One breaker per stage process; never shared across stage instances. The
/// interior state is guarded by a single mutex that is never held across an
/// await point.
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker in the closed state.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerInner {
                config,
                state: CircuitState::Closed,
                attempts: 0,
                failures: 0,
                consecutive_successes: 0,
                transitions: 0,
                entered_at: Instant::now(),
            }),
        }
    }

    /// Run `op` under the breaker.
    ///
    /// While open (and the open window has not elapsed) the operation is not
    /// invoked and the call fails immediately with the circuit-open error.
    pub async fn execute<F, Fut, T>(&self, op: F) -> ChainResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ChainResult<T>>,
    {
        self.check_allowed()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Current state as last recorded; the open -> half-open transition only
    /// happens on an `execute` call.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        inner.state
    }

    /// Counter snapshot for monitoring.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state: inner.state,
            attempts: inner.attempts,
            failures: inner.failures,
            consecutive_successes: inner.consecutive_successes,
            transitions: inner.transitions,
        }
    }

    /// Swap in new thresholds; they apply to subsequent evaluations while the
    /// current state and counters are preserved.
    pub fn update_config(&self, config: CircuitBreakerConfig) {
        let mut inner = self.inner.lock();
        if inner.config != config {
            debug!("Circuit breaker '{}' thresholds updated", self.name);
            inner.config = config;
        }
    }

    /// Force the breaker back to closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.transition(&self.name, CircuitState::Closed);
    }

    fn check_allowed(&self) -> ChainResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                if inner.entered_at.elapsed() >= inner.config.open_state() {
                    inner.transition(&self.name, CircuitState::HalfOpen);
                    Ok(())
                } else {
                    Err(ChainError::circuit_open(format!(
                        "circuit breaker '{}' is open",
                        self.name
                    )))
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.attempts += 1;
        match inner.state {
            CircuitState::Closed | CircuitState::Open => {}
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= inner.config.half_open_request_threshold {
                    inner.transition(&self.name, CircuitState::Closed);
                }
            }
        }
    }

    fn record_failure(&self, err: &ChainError) {
        let mut inner = self.inner.lock();
        inner.attempts += 1;
        inner.failures += 1;
        match inner.state {
            CircuitState::Closed => {
                // exact integer form of failures*100/attempts >= threshold
                let threshold = inner.config.error_threshold_percentage as u64;
                if inner.failures * 100 >= threshold * inner.attempts {
                    warn!(
                        "Circuit breaker '{}' tripping after {}/{} failed attempts: {}",
                        self.name, inner.failures, inner.attempts, err
                    );
                    inner.transition(&self.name, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.transition(&self.name, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }
}
