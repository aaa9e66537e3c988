//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Stage-side configuration subscriber
//!
//! Maintains a config stream to the controller and pushes every received
//! generation into the owning function block. Every apply attempt is
//! acknowledged, success or not; a failed apply leaves the previous
//! configuration authoritative and the controller learns why. Lost streams
//! reconnect with capped backoff, resuming from the last applied generation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use fblock_core::{ChainError, ChainResult, FunctionBlock, PipelineConfig};
use fblock_proto as proto;
use fblock_proto::ConfigServiceClient;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(15);

/// Identity and endpoint for one subscribing stage instance.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Controller endpoint, e.g. `http://127.0.0.1:7500`.
    pub controller_endpoint: String,
    pub fb_id: String,
    pub instance_id: String,
}

/// Long-running task feeding controller updates into a function block.
pub struct ConfigSubscriber {
    config: SubscriberConfig,
    block: Arc<dyn FunctionBlock>,
}

impl ConfigSubscriber {
    pub fn new(config: SubscriberConfig, block: Arc<dyn FunctionBlock>) -> Self {
        Self { config, block }
    }

    /// Run until the shutdown flag flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_applied: u64 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_stream(&mut last_applied, &mut shutdown).await {
                Ok(true) => break,
                Ok(false) => {
                    // connected and streamed; start the next attempt fresh
                    backoff = INITIAL_BACKOFF;
                }
                Err(e) => {
                    warn!(
                        "Stage '{}' could not reach the controller: {}",
                        self.config.fb_id, e
                    );
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        info!("Config subscriber for '{}' stopped", self.config.fb_id);
    }

    /// One stream lifetime. Returns true when shutdown was requested,
    /// false when the stream ended and a reconnect is due.
    async fn run_stream(
        &self,
        last_applied: &mut u64,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ChainResult<bool> {
        let mut client = ConfigServiceClient::connect(self.config.controller_endpoint.clone())
            .await
            .map_err(|e| {
                ChainError::network_with_source(
                    format!("could not connect to '{}'", self.config.controller_endpoint),
                    e,
                )
            })?;

        let mut stream = client
            .stream_config(proto::StreamConfigRequest {
                fb_id: self.config.fb_id.clone(),
                instance_id: self.config.instance_id.clone(),
                current_generation: *last_applied,
            })
            .await
            .map_err(|e| {
                ChainError::network_with_source("config subscription was refused", e)
            })?
            .into_inner();
        info!(
            "Stage '{}/{}' subscribed to controller at '{}' (generation {})",
            self.config.fb_id,
            self.config.instance_id,
            self.config.controller_endpoint,
            *last_applied
        );

        loop {
            tokio::select! {
                message = stream.message() => match message {
                    Ok(Some(update)) => {
                        self.handle_update(&mut client, update, last_applied).await;
                    }
                    Ok(None) => {
                        warn!(
                            "Config stream for '{}' ended; reconnecting",
                            self.config.fb_id
                        );
                        return Ok(false);
                    }
                    Err(status) => {
                        warn!(
                            "Config stream for '{}' failed: {}; reconnecting",
                            self.config.fb_id, status
                        );
                        return Ok(false);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(true);
                    }
                }
            }
        }
    }

    /// Apply one pushed update and acknowledge the attempt.
    async fn handle_update(
        &self,
        client: &mut ConfigServiceClient<Channel>,
        update: proto::ConfigUpdate,
        last_applied: &mut u64,
    ) {
        let generation = update.generation;
        let Some(wire) = update.config else {
            debug!(
                "Stage '{}' ignoring payload-less update at generation {}",
                self.config.fb_id, generation
            );
            return;
        };

        let outcome = match PipelineConfig::try_from(wire) {
            Ok(domain) => match serde_json::to_vec(&domain) {
                Ok(raw) => self.block.update_config(&raw, generation).await,
                Err(e) => Err(ChainError::serialization_with_source(
                    "could not re-encode pipeline config",
                    e,
                )),
            },
            Err(e) => Err(e),
        };

        let (success, error_message) = match outcome {
            Ok(()) => {
                *last_applied = generation;
                (true, String::new())
            }
            Err(e) => {
                warn!(
                    "Stage '{}' failed to apply generation {}: {}",
                    self.config.fb_id, generation, e
                );
                (false, e.to_string())
            }
        };

        // every apply attempt is acknowledged; a lost ack never stalls the stream
        let ack = client
            .ack_config(proto::AckConfigRequest {
                fb_id: self.config.fb_id.clone(),
                instance_id: self.config.instance_id.clone(),
                applied_generation: generation,
                success,
                error_message,
            })
            .await;
        if let Err(status) = ack {
            warn!(
                "Stage '{}' could not acknowledge generation {}: {}",
                self.config.fb_id, generation, status
            );
        }
    }
}
