//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Chain-push integration tests
//!
//! Real stages behind real gRPC servers: a batch enters over the wire and the
//! tests observe what lands downstream, in the DLQ store, and in the response.

mod support;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;

use fblock_core::types::{LABEL_ERROR, LABEL_ERROR_CODE, LABEL_FB_SENDER};
use fblock_core::{
    ErrorCode, FunctionBlock, MetricBatch, ProcessResult, ProcessStatus, RetryConfig,
};
use fblock_proto::{ChainPushServiceClient, MetricBatchRequest};
use fblock_runtime::{
    ChainForwarder, ChainPush, DlqStage, DlqStore, ForwarderConfig, GatewayStage, LoggingExporter,
    MemoryDlqStore, RelayStage, StructuralValidator,
};

use support::{
    apply, dead_addr, endpoint, metrics, pipeline, spawn_push_server, RecordingBlock,
    ScriptedReply,
};

/// Retry policy that gives up after the first attempt.
fn single_attempt() -> RetryConfig {
    RetryConfig {
        max_attempts: 1,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        enable_jitter: false,
        ..Default::default()
    }
}

fn forwarder_to(addr: std::net::SocketAddr) -> Arc<dyn ChainPush> {
    Arc::new(ChainForwarder::new(ForwarderConfig::new(endpoint(addr))).unwrap())
}

/// Spawn a ready DLQ stage on an ephemeral port, returning its store.
async fn spawn_dlq(
    shutdown: watch::Receiver<bool>,
) -> (Arc<MemoryDlqStore>, std::net::SocketAddr) {
    let store = Arc::new(MemoryDlqStore::new());
    let stage = Arc::new(DlqStage::new("fb-dlq", store.clone(), metrics()));
    stage.initialize().await.unwrap();
    apply(stage.as_ref(), &pipeline(1, &["fb-dlq"])).await;
    let addr = spawn_push_server(stage, shutdown).await;
    (store, addr)
}

async fn push(
    addr: std::net::SocketAddr,
    batch: MetricBatch,
) -> ProcessResult {
    let mut client = ChainPushServiceClient::connect(endpoint(addr)).await.unwrap();
    let response = client
        .push_metrics(MetricBatchRequest::from(batch))
        .await
        .unwrap();
    ProcessResult::from(response.into_inner())
}

#[tokio::test]
async fn test_gateway_routes_invalid_batch_to_dlq() {
    let (shutdown_tx, shutdown) = watch::channel(false);
    let (store, dlq_addr) = spawn_dlq(shutdown.clone()).await;

    let gateway = Arc::new(GatewayStage::new(
        "fb-gw",
        Arc::new(StructuralValidator::new().unwrap()),
        Arc::new(LoggingExporter),
        Some(forwarder_to(dlq_addr)),
        single_attempt(),
        metrics(),
    ));
    gateway.initialize().await.unwrap();
    let mut config = pipeline(1, &["fb-gw", "fb-dlq"]);
    config
        .function_blocks
        .get_mut("fb-gw")
        .unwrap()
        .parameters = json!({"schema_enforce": true});
    apply(gateway.as_ref(), &config).await;
    let gw_addr = spawn_push_server(gateway, shutdown).await;

    let payload = serde_json::to_vec(&json!({"spans": []})).unwrap();
    let result = push(gw_addr, MetricBatch::new(payload, "otlp")).await;

    assert_eq!(result.status, ProcessStatus::Error);
    assert_eq!(result.error_code, Some(ErrorCode::ErrInvalidInput));
    assert!(result.sent_to_dlq);

    let entries = store.scan().await.unwrap();
    assert_eq!(entries.len(), 1);
    let labels = &entries[0].batch.internal_labels;
    assert_eq!(labels.get(LABEL_FB_SENDER).map(String::as_str), Some("fb-gw"));
    assert_eq!(
        labels.get(LABEL_ERROR_CODE).map(String::as_str),
        Some("ERR_INVALID_INPUT")
    );
    assert!(labels.get(LABEL_ERROR).unwrap().contains("resource_metrics"));

    drop(shutdown_tx);
}

#[tokio::test]
async fn test_unreachable_dlq_is_reported_distinctly() {
    let (shutdown_tx, shutdown) = watch::channel(false);

    let gateway = Arc::new(GatewayStage::new(
        "fb-gw",
        Arc::new(StructuralValidator::new().unwrap()),
        Arc::new(LoggingExporter),
        Some(forwarder_to(dead_addr().await)),
        single_attempt(),
        metrics(),
    ));
    gateway.initialize().await.unwrap();
    let mut config = pipeline(1, &["fb-gw"]);
    config
        .function_blocks
        .get_mut("fb-gw")
        .unwrap()
        .parameters = json!({"schema_enforce": true});
    apply(gateway.as_ref(), &config).await;
    let gw_addr = spawn_push_server(gateway, shutdown).await;

    let payload = serde_json::to_vec(&json!({"spans": []})).unwrap();
    let result = push(gw_addr, MetricBatch::new(payload, "otlp")).await;

    // Failing to reach the DLQ is its own failure, not a validation verdict.
    assert_eq!(result.status, ProcessStatus::Error);
    assert_eq!(result.error_code, Some(ErrorCode::ErrDlqSendFailed));
    assert!(!result.sent_to_dlq);

    drop(shutdown_tx);
}

#[tokio::test]
async fn test_relay_forwards_with_provenance() {
    let (shutdown_tx, shutdown) = watch::channel(false);
    let downstream = RecordingBlock::ready_with("fb-down", ScriptedReply::Success);
    let down_addr = spawn_push_server(downstream.clone(), shutdown.clone()).await;

    let relay = Arc::new(RelayStage::new(
        "fb-relay",
        forwarder_to(down_addr),
        None,
        single_attempt(),
        metrics(),
    ));
    relay.initialize().await.unwrap();
    apply(relay.as_ref(), &pipeline(3, &["fb-relay"])).await;
    let relay_addr = spawn_push_server(relay, shutdown).await;

    let batch = MetricBatch::new(b"payload".to_vec(), "otlp");
    let batch_id = batch.batch_id.clone();
    let result = push(relay_addr, batch).await;

    assert_eq!(result.status, ProcessStatus::Success);
    assert_eq!(result.batch_id, batch_id);

    let seen = downstream.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].batch_id, batch_id);
    assert_eq!(seen[0].config_generation, 3);
    assert_eq!(
        seen[0].internal_labels.get(LABEL_FB_SENDER).map(String::as_str),
        Some("fb-relay")
    );

    drop(shutdown_tx);
}

#[tokio::test]
async fn test_relay_hands_off_when_downstream_is_down() {
    let (shutdown_tx, shutdown) = watch::channel(false);
    let (store, dlq_addr) = spawn_dlq(shutdown.clone()).await;

    let relay = Arc::new(RelayStage::new(
        "fb-relay",
        forwarder_to(dead_addr().await),
        Some(forwarder_to(dlq_addr)),
        single_attempt(),
        metrics(),
    ));
    relay.initialize().await.unwrap();
    apply(relay.as_ref(), &pipeline(1, &["fb-relay", "fb-dlq"])).await;
    let relay_addr = spawn_push_server(relay, shutdown).await;

    let result = push(relay_addr, MetricBatch::new(b"payload".to_vec(), "otlp")).await;

    assert_eq!(result.status, ProcessStatus::Error);
    assert_eq!(result.error_code, Some(ErrorCode::ErrForwardingFailed));
    assert!(result.sent_to_dlq);

    let entries = store.scan().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0]
            .batch
            .internal_labels
            .get(LABEL_ERROR_CODE)
            .map(String::as_str),
        Some("ERR_SERVICE_UNAVAILABLE")
    );

    drop(shutdown_tx);
}

#[tokio::test]
async fn test_unconfigured_stage_answers_unavailable() {
    let (shutdown_tx, shutdown) = watch::channel(false);

    let relay = Arc::new(RelayStage::new(
        "fb-relay",
        forwarder_to(dead_addr().await),
        None,
        single_attempt(),
        metrics(),
    ));
    relay.initialize().await.unwrap();
    // No configuration generation applied.
    let relay_addr = spawn_push_server(relay, shutdown).await;

    let result = push(relay_addr, MetricBatch::new(b"payload".to_vec(), "otlp")).await;

    assert_eq!(result.status, ProcessStatus::Error);
    assert_eq!(result.error_code, Some(ErrorCode::ErrServiceUnavailable));
    assert!(!result.sent_to_dlq);

    drop(shutdown_tx);
}
