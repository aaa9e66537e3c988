//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Generated gRPC code and wire conversions for the fblock pipeline
//!
//! The `fblock.v1` package carries the Chain-Push RPC (`ChainPushService`)
//! and config distribution (`ConfigService`). The [`convert`] module maps
//! the generated wire types to and from the `fblock-core` domain types.

pub mod convert;

pub mod fblock {
    pub mod v1 {
        tonic::include_proto!("fblock.v1");
    }
}

pub use fblock::v1::*;

// Re-export the service entry points under flat names
pub use fblock::v1::chain_push_service_client::ChainPushServiceClient;
pub use fblock::v1::chain_push_service_server::{ChainPushService, ChainPushServiceServer};
pub use fblock::v1::config_service_client::ConfigServiceClient;
pub use fblock::v1::config_service_server::{ConfigService, ConfigServiceServer};
