//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Shared fixtures for the runtime integration tests
//!
//! Real gRPC servers on ephemeral ports plus a scriptable function block so
//! the tests can stand on either side of the chain-push wire.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use fblock_core::{
    ChainError, ChainResult, ErrorCode, FbConfig, FunctionBlock, MetricBatch, PipelineConfig,
    ProcessResult, StageMetrics,
};
use fblock_proto::{ChainPushServiceServer, ConfigServiceServer};
use fblock_runtime::{ConfigController, ControllerService, StagePushService};

/// Answer a `RecordingBlock` gives for every pushed batch.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Success,
    Throttled,
    Reject(ErrorCode, &'static str),
}

/// Function block double that records what reaches it over the wire.
pub struct RecordingBlock {
    name: &'static str,
    ready: AtomicBool,
    reply: Mutex<ScriptedReply>,
    seen: Mutex<Vec<MetricBatch>>,
    applied: Mutex<Vec<u64>>,
}

impl RecordingBlock {
    /// Create a block that is ready immediately and answers with `reply`.
    pub fn ready_with(name: &'static str, reply: ScriptedReply) -> Arc<Self> {
        Arc::new(Self {
            name,
            ready: AtomicBool::new(true),
            reply: Mutex::new(reply),
            seen: Mutex::new(Vec::new()),
            applied: Mutex::new(Vec::new()),
        })
    }

    pub fn set_reply(&self, reply: ScriptedReply) {
        *self.reply.lock() = reply;
    }

    /// Batches received so far, in arrival order.
    pub fn seen(&self) -> Vec<MetricBatch> {
        self.seen.lock().clone()
    }

    /// Configuration generations handed to `update_config`, in order.
    pub fn applied_generations(&self) -> Vec<u64> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl FunctionBlock for RecordingBlock {
    fn name(&self) -> &str {
        self.name
    }

    async fn initialize(&self) -> ChainResult<()> {
        Ok(())
    }

    async fn process_batch(&self, batch: MetricBatch) -> ChainResult<ProcessResult> {
        let batch_id = batch.batch_id.clone();
        self.seen.lock().push(batch);
        match self.reply.lock().clone() {
            ScriptedReply::Success => Ok(ProcessResult::success(batch_id)),
            ScriptedReply::Throttled => Ok(ProcessResult::throttled(batch_id)),
            ScriptedReply::Reject(code, message) => {
                Ok(ProcessResult::error(batch_id, code, message))
            }
        }
    }

    async fn update_config(&self, config: &[u8], generation: u64) -> ChainResult<()> {
        let _: PipelineConfig = serde_json::from_slice(config)
            .map_err(|e| ChainError::invalid_config_with_source("unparseable config", e))?;
        self.applied.lock().push(generation);
        Ok(())
    }

    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> ChainResult<()> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Fresh metrics backed by a throwaway registry.
pub fn metrics() -> StageMetrics {
    StageMetrics::new(&Registry::new()).unwrap()
}

/// Serve `block` behind a real chain-push server on an ephemeral port.
pub async fn spawn_push_server(
    block: Arc<dyn FunctionBlock>,
    shutdown: watch::Receiver<bool>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = StagePushService::new(block, metrics());
    tokio::spawn(serve_push(service, listener, shutdown));
    addr
}

async fn serve_push(
    service: StagePushService,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    Server::builder()
        .add_service(ChainPushServiceServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .unwrap();
}

/// Serve a config controller on an ephemeral port.
pub async fn spawn_controller(
    controller: Arc<ConfigController>,
    mut shutdown: watch::Receiver<bool>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = ControllerService::new(controller);
    tokio::spawn(async move {
        Server::builder()
            .add_service(ConfigServiceServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .unwrap();
    });
    addr
}

/// An address nothing listens on, for exercising unreachable-target paths.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Endpoint string for dialing `addr`.
pub fn endpoint(addr: SocketAddr) -> String {
    format!("http://{}", addr)
}

/// Pipeline config carrying default entries for the named stages.
pub fn pipeline(generation: u64, names: &[&str]) -> PipelineConfig {
    let mut config = PipelineConfig::new(generation, "vtest");
    for name in names {
        config = config.with_block(*name, FbConfig::default());
    }
    config
}

/// Apply `config` to `block` under the config's own generation.
pub async fn apply(block: &dyn FunctionBlock, config: &PipelineConfig) {
    let raw = serde_json::to_vec(config).unwrap();
    block.update_config(&raw, config.generation).await.unwrap();
}

/// Poll `probe` until it returns true or the deadline passes.
pub async fn wait_for<F>(what: &str, mut probe: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if probe() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
