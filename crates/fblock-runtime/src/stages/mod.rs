//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Stage implementations
//!
//! Each stage composes `FunctionBlockBase` with its own processing behavior:
//! the gateway validates and exports, the relay forwards downstream, and the
//! DLQ stage (in `crate::dlq`) persists the failure path.

pub mod gateway;
pub mod relay;

pub use gateway::{
    BatchExporter, BatchValidator, GatewayParams, GatewayStage, LoggingExporter,
    StructuralValidator, ValidationKind, ValidationVerdict,
};
pub use relay::RelayStage;

use parking_lot::Mutex;

use fblock_core::{CircuitState, StageMetrics};

/// Update the breaker gauge and count a transition when the observed state
/// differs from the last observation.
pub(crate) fn record_breaker_state(
    metrics: &StageMetrics,
    last: &Mutex<CircuitState>,
    state: CircuitState,
) {
    metrics.set_breaker_state(state);
    let mut last = last.lock();
    if *last != state {
        metrics
            .breaker_transitions_total
            .with_label_values(&[state.as_str()])
            .inc();
        *last = state;
    }
}
