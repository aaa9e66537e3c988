//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Stage metrics
//!
//! One `StageMetrics` instance per process, registered against the registry
//! created at startup and passed through constructors. Never a process-wide
//! global.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

use crate::error::{ChainError, ChainResult};
use crate::utils::circuit_breaker::CircuitState;

/// Counters, gauges, and histograms shared by every stage kind.
#[derive(Clone)]
pub struct StageMetrics {
    // Processing
    pub batches_total: IntCounterVec,
    pub process_duration: Histogram,

    // Forwarding and DLQ hand-off
    pub forwards_total: IntCounterVec,
    pub dlq_handoffs_total: IntCounter,
    pub dlq_handoff_failures_total: IntCounter,

    // Circuit breaker
    pub breaker_state: IntGauge,
    pub breaker_transitions_total: IntCounterVec,

    // Configuration
    pub config_generation: IntGauge,
    pub config_apply_failures_total: IntCounter,

    // Replay
    pub replay_batches_total: IntCounterVec,
}

impl StageMetrics {
    /// Create and register the stage metric set.
    pub fn new(registry: &Registry) -> ChainResult<Self> {
        let batches_total = IntCounterVec::new(
            Opts::new("fblock_batches_total", "Batches processed by result"),
            &["result"],
        )
        .map_err(metrics_error)?;

        let process_duration = Histogram::with_opts(
            HistogramOpts::new(
                "fblock_process_duration_seconds",
                "Batch processing latency",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )
        .map_err(metrics_error)?;

        let forwards_total = IntCounterVec::new(
            Opts::new(
                "fblock_forwards_total",
                "Chain-push attempts to the downstream target by outcome",
            ),
            &["outcome"],
        )
        .map_err(metrics_error)?;

        let dlq_handoffs_total = IntCounter::with_opts(Opts::new(
            "fblock_dlq_handoffs_total",
            "Batches successfully handed off to the DLQ stage",
        ))
        .map_err(metrics_error)?;

        let dlq_handoff_failures_total = IntCounter::with_opts(Opts::new(
            "fblock_dlq_handoff_failures_total",
            "DLQ hand-offs that themselves failed",
        ))
        .map_err(metrics_error)?;

        let breaker_state = IntGauge::with_opts(Opts::new(
            "fblock_breaker_state",
            "Circuit breaker state (0 closed, 1 open, 2 half-open)",
        ))
        .map_err(metrics_error)?;

        let breaker_transitions_total = IntCounterVec::new(
            Opts::new(
                "fblock_breaker_transitions_total",
                "Circuit breaker transitions by target state",
            ),
            &["to"],
        )
        .map_err(metrics_error)?;

        let config_generation = IntGauge::with_opts(Opts::new(
            "fblock_config_generation",
            "Currently applied configuration generation",
        ))
        .map_err(metrics_error)?;

        let config_apply_failures_total = IntCounter::with_opts(Opts::new(
            "fblock_config_apply_failures_total",
            "Configuration pushes that failed to apply",
        ))
        .map_err(metrics_error)?;

        let replay_batches_total = IntCounterVec::new(
            Opts::new(
                "fblock_replay_batches_total",
                "DLQ replay attempts by outcome",
            ),
            &["outcome"],
        )
        .map_err(metrics_error)?;

        // Register all metrics
        registry
            .register(Box::new(batches_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(process_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(forwards_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(dlq_handoffs_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(dlq_handoff_failures_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(breaker_state.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(breaker_transitions_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(config_generation.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(config_apply_failures_total.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(replay_batches_total.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            batches_total,
            process_duration,
            forwards_total,
            dlq_handoffs_total,
            dlq_handoff_failures_total,
            breaker_state,
            breaker_transitions_total,
            config_generation,
            config_apply_failures_total,
            replay_batches_total,
        })
    }

    /// Record the observed breaker state on the gauge.
    pub fn set_breaker_state(&self, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        };
        self.breaker_state.set(value);
    }
}

fn metrics_error(err: prometheus::Error) -> ChainError {
    ChainError::internal_with_source("metrics registration failed", err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_against_the_given_registry() {
        let registry = Registry::new();
        let metrics = StageMetrics::new(&registry).unwrap();

        metrics.batches_total.with_label_values(&["success"]).inc();
        metrics.set_breaker_state(CircuitState::HalfOpen);

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "fblock_batches_total"));
        let breaker = families
            .iter()
            .find(|f| f.get_name() == "fblock_breaker_state")
            .unwrap();
        assert_eq!(breaker.get_metric()[0].get_gauge().get_value() as i64, 2);
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        assert!(StageMetrics::new(&registry).is_ok());
        // same names, same registry
        assert!(StageMetrics::new(&registry).is_err());
    }
}
