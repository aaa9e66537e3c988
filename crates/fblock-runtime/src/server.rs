//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Chain push server
//!
//! gRPC surface every stage exposes to its upstream neighbor. The handler
//! never maps a processing failure to a transport error: whatever happens
//! inside the stage comes back as a structured `MetricBatchResponse`, so
//! transport-level errors always mean the stage itself was unreachable.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use fblock_core::{ChainError, ChainResult, ErrorCode, FunctionBlock, ProcessResult, StageMetrics};
use fblock_proto::{ChainPushService, ChainPushServiceServer, MetricBatchRequest, MetricBatchResponse};

/// Bound on a single batch, covering processing and forwarding.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `ChainPushService` implementation delegating to a function block.
pub struct StagePushService {
    block: Arc<dyn FunctionBlock>,
    metrics: StageMetrics,
    request_timeout: Duration,
}

impl StagePushService {
    pub fn new(block: Arc<dyn FunctionBlock>, metrics: StageMetrics) -> Self {
        Self {
            block,
            metrics,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[tonic::async_trait]
impl ChainPushService for StagePushService {
    async fn push_metrics(
        &self,
        request: Request<MetricBatchRequest>,
    ) -> Result<Response<MetricBatchResponse>, Status> {
        let batch: fblock_core::MetricBatch = request.into_inner().into();
        let batch_id = batch.batch_id.clone();
        debug!(
            "Stage '{}' received batch '{}' ({} bytes, replay: {})",
            self.block.name(),
            batch_id,
            batch.payload_size(),
            batch.replay
        );

        let timer = self.metrics.process_duration.start_timer();
        let result =
            match tokio::time::timeout(self.request_timeout, self.block.process_batch(batch)).await
            {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    warn!("Stage '{}' failed on batch '{}': {}", self.block.name(), batch_id, e);
                    ProcessResult::error(batch_id, e.error_code(), e.to_string())
                }
                // A caller that gave up waiting sees the same code.
                Err(_) => ProcessResult::error(
                    batch_id,
                    ErrorCode::ErrTimeout,
                    format!(
                        "processing did not finish within {:?}",
                        self.request_timeout
                    ),
                ),
            };
        timer.observe_duration();
        self.metrics
            .batches_total
            .with_label_values(&[result.status.as_str()])
            .inc();

        Ok(Response::new(result.into()))
    }
}

/// gRPC server wrapper binding a stage's push surface.
pub struct PushServer {
    addr: SocketAddr,
    service: StagePushService,
}

impl PushServer {
    pub fn new(addr: SocketAddr, service: StagePushService) -> Self {
        Self { addr, service }
    }

    /// Serve until the shutdown flag flips to true.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> ChainResult<()> {
        info!("Chain push server listening on {}", self.addr);
        Server::builder()
            .add_service(ChainPushServiceServer::new(self.service))
            .serve_with_shutdown(self.addr, async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .map_err(|e| ChainError::network_with_source("chain push server failed", e))?;
        info!("Chain push server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fblock_core::{MetricBatch, ProcessStatus};
    use prometheus::Registry;

    struct StubBlock {
        delay: Option<Duration>,
    }

    #[async_trait]
    impl FunctionBlock for StubBlock {
        fn name(&self) -> &str {
            "fb-stub"
        }

        async fn initialize(&self) -> ChainResult<()> {
            Ok(())
        }

        async fn process_batch(&self, batch: MetricBatch) -> ChainResult<ProcessResult> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(ProcessResult::success(batch.batch_id))
        }

        async fn update_config(&self, _raw: &[u8], _generation: u64) -> ChainResult<()> {
            Ok(())
        }

        fn ready(&self) -> bool {
            true
        }

        async fn shutdown(&self) -> ChainResult<()> {
            Ok(())
        }
    }

    fn request(batch_id: &str) -> Request<MetricBatchRequest> {
        let batch = MetricBatch::new(b"payload".to_vec(), "otlp").with_batch_id(batch_id);
        Request::new(batch.into())
    }

    #[tokio::test]
    async fn test_success_comes_back_structured() {
        let service = StagePushService::new(
            Arc::new(StubBlock { delay: None }),
            StageMetrics::new(&Registry::new()).unwrap(),
        );

        let response = service.push_metrics(request("b-1")).await.unwrap();
        let result: ProcessResult = response.into_inner().into();

        assert_eq!(result.status, ProcessStatus::Success);
        assert_eq!(result.batch_id, "b-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_processing_times_out_with_err_timeout() {
        let service = StagePushService::new(
            Arc::new(StubBlock {
                delay: Some(Duration::from_secs(60)),
            }),
            StageMetrics::new(&Registry::new()).unwrap(),
        )
        .with_request_timeout(Duration::from_millis(50));

        let response = service.push_metrics(request("b-2")).await.unwrap();
        let result: ProcessResult = response.into_inner().into();

        assert_eq!(result.status, ProcessStatus::Error);
        assert_eq!(result.error_code, Some(ErrorCode::ErrTimeout));
        assert_eq!(result.batch_id, "b-2");
    }
}
