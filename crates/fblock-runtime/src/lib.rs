//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! fblock stage runtime
//!
//! Everything a pipeline process is made of: the concrete stages (gateway,
//! relay, DLQ), the chain-push gRPC server and client, the configuration
//! controller and its stage-side subscriber, DLQ storage with the replay
//! driver, the admin HTTP surface, and the runtime that wires a block to its
//! servers and tears them down in order.

pub mod controller;
pub mod dlq;
pub mod forwarder;
pub mod http;
pub mod runtime;
pub mod server;
pub mod stages;
pub mod subscriber;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use controller::{AckRecord, ConfigController, ControllerServer, ControllerService};
pub use dlq::{
    DlqEntry, DlqStage, DlqStore, FileDlqStore, MemoryDlqStore, ReplayConfig, ReplayDriver,
    ReplayReport,
};
pub use forwarder::{ChainForwarder, ChainPush, ForwarderConfig, PushOutcome};
pub use http::AdminServer;
pub use runtime::{shutdown_signal, StageRuntime, DEFAULT_SHUTDOWN_GRACE};
pub use server::{PushServer, StagePushService};
pub use stages::{
    BatchExporter, BatchValidator, GatewayParams, GatewayStage, LoggingExporter, RelayStage,
    StructuralValidator, ValidationKind, ValidationVerdict,
};
pub use subscriber::{ConfigSubscriber, SubscriberConfig};
