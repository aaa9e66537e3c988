//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Chain-push client
//!
//! A stage talks to exactly one downstream target per call: the next stage,
//! or the DLQ stage when processing or forwarding failed. The channel is
//! established lazily on first use, reused across calls, and dropped on
//! transport failure so the next call redials.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};
use tracing::debug;

use fblock_core::{ChainError, ChainResult, ErrorCode, MetricBatch};
use fblock_proto::{ChainPushServiceClient, MetricBatchRequest, PushStatus};

/// Default per-call deadline for a chain push.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for establishing the downstream channel.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Result of a push the peer actually answered.
///
/// Transport-level failures (unreachable, timed out, connection reset) are
/// reported as `ChainError` instead; only those count as circuit-breaker
/// failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The peer accepted the batch.
    Delivered,
    /// The peer is shedding load; back off and retry later.
    Throttled,
    /// The peer refused the batch with a structured error.
    Rejected { code: ErrorCode, message: String },
}

/// Anything a stage can push a batch to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainPush: Send + Sync {
    /// Push one batch and classify the peer's answer.
    async fn push(&self, batch: MetricBatch) -> ChainResult<PushOutcome>;

    /// Drop the cached connection, if any.
    async fn disconnect(&self);
}

/// Connection settings for one downstream target.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Downstream endpoint, e.g. `http://127.0.0.1:7501`.
    pub endpoint: String,

    /// Deadline for establishing the channel.
    pub connect_timeout: Duration,

    /// Deadline applied to every push call.
    pub request_timeout: Duration,
}

impl ForwarderConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_PUSH_TIMEOUT,
        }
    }
}

/// Chain-push client for one downstream target.
#[derive(Debug)]
pub struct ChainForwarder {
    target: String,
    endpoint: Endpoint,
    request_timeout: Duration,
    channel: Mutex<Option<Channel>>,
}

impl ChainForwarder {
    /// Build a forwarder; the endpoint must be a valid URI.
    pub fn new(config: ForwarderConfig) -> ChainResult<Self> {
        let endpoint = Endpoint::from_shared(config.endpoint.clone())
            .map_err(|e| {
                ChainError::invalid_config_with_source(
                    format!("invalid downstream endpoint '{}'", config.endpoint),
                    e,
                )
            })?
            .connect_timeout(config.connect_timeout);
        Ok(Self {
            target: config.endpoint,
            endpoint,
            request_timeout: config.request_timeout,
            channel: Mutex::new(None),
        })
    }

    /// The endpoint this forwarder pushes to.
    pub fn target(&self) -> &str {
        &self.target
    }

    async fn channel(&self) -> ChainResult<Channel> {
        let mut cached = self.channel.lock().await;
        if let Some(channel) = cached.as_ref() {
            return Ok(channel.clone());
        }
        let channel = self.endpoint.connect().await.map_err(|e| {
            ChainError::network_with_source(format!("could not reach '{}'", self.target), e)
        })?;
        debug!("Connected chain-push channel to '{}'", self.target);
        *cached = Some(channel.clone());
        Ok(channel)
    }

    async fn reset(&self) {
        let mut cached = self.channel.lock().await;
        *cached = None;
    }

    fn status_error(&self, status: Status) -> ChainError {
        match status.code() {
            Code::Unavailable => ChainError::unavailable(format!(
                "downstream '{}' unavailable: {}",
                self.target,
                status.message()
            )),
            // Cancellation is treated the same as a timeout.
            Code::DeadlineExceeded | Code::Cancelled => ChainError::timeout(format!(
                "push to '{}' timed out: {}",
                self.target,
                status.message()
            )),
            _ => {
                ChainError::network_with_source(format!("push to '{}' failed", self.target), status)
            }
        }
    }
}

#[async_trait]
impl ChainPush for ChainForwarder {
    async fn push(&self, batch: MetricBatch) -> ChainResult<PushOutcome> {
        let channel = self.channel().await?;
        let mut client = ChainPushServiceClient::new(channel);
        let request = Request::new(MetricBatchRequest::from(batch));

        let response = match tokio::time::timeout(self.request_timeout, client.push_metrics(request))
            .await
        {
            Err(_) => {
                self.reset().await;
                return Err(ChainError::timeout(format!(
                    "push to '{}' exceeded {:?}",
                    self.target, self.request_timeout
                )));
            }
            Ok(Err(status)) => {
                self.reset().await;
                return Err(self.status_error(status));
            }
            Ok(Ok(response)) => response.into_inner(),
        };

        match response.status() {
            PushStatus::Success => Ok(PushOutcome::Delivered),
            PushStatus::Throttled => Ok(PushOutcome::Throttled),
            PushStatus::Error => Ok(PushOutcome::Rejected {
                code: ErrorCode::from(response.error_code()),
                message: response.error_message,
            }),
            PushStatus::Unknown => Ok(PushOutcome::Rejected {
                code: ErrorCode::ErrUnknown,
                message: format!("downstream '{}' returned an unknown status", self.target),
            }),
        }
    }

    async fn disconnect(&self) {
        let mut cached = self.channel.lock().await;
        if cached.take().is_some() {
            debug!("Closed chain-push channel to '{}'", self.target);
        }
    }
}
