//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Admin HTTP endpoints
//!
//! Probes, Prometheus metrics, and the operator API. Which routes exist
//! depends on what the process hosts: the controller mounts the config and
//! ack endpoints, a stage with a DLQ mounts inspection and replay.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde_json::json;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use fblock_core::{ChainError, ChainResult, FunctionBlock, PipelineConfig, LABEL_ERROR_CODE, LABEL_FB_SENDER};

use crate::controller::ConfigController;
use crate::dlq::{DlqStore, ReplayDriver};

/// HTTP server for probes and the operator API.
pub struct AdminServer {
    service: String,
    registry: Registry,
    block: Option<Arc<dyn FunctionBlock>>,
    controller: Option<Arc<ConfigController>>,
    dlq_store: Option<Arc<dyn DlqStore>>,
    replay: Option<Arc<ReplayDriver>>,
}

impl AdminServer {
    /// Create a server exposing probes and metrics only.
    pub fn new(service: impl Into<String>, registry: Registry) -> Self {
        Self {
            service: service.into(),
            registry,
            block: None,
            controller: None,
            dlq_store: None,
            replay: None,
        }
    }

    /// Tie readiness to a function block.
    pub fn with_block(mut self, block: Arc<dyn FunctionBlock>) -> Self {
        self.block = Some(block);
        self
    }

    /// Mount the controller config and ack endpoints.
    pub fn with_controller(mut self, controller: Arc<ConfigController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Mount DLQ inspection and replay endpoints.
    pub fn with_dlq(mut self, store: Arc<dyn DlqStore>, replay: Option<Arc<ReplayDriver>>) -> Self {
        self.dlq_store = Some(store);
        self.replay = replay;
        self
    }

    /// Create router with all endpoints
    pub fn create_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health/live", get(Self::health_live))
            .route("/health/ready", get(Self::health_ready))
            .route("/metrics", get(Self::metrics));
        if self.controller.is_some() {
            router = router
                .route(
                    "/api/v1/config",
                    get(Self::get_config).post(Self::publish_config),
                )
                .route("/api/v1/acks", get(Self::list_acks));
        }
        if self.dlq_store.is_some() {
            router = router.route("/api/v1/dlq", get(Self::list_dlq));
        }
        if self.replay.is_some() {
            router = router.route("/api/v1/replay", post(Self::trigger_replay));
        }
        router
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(self.clone()))
    }

    /// Serve until the shutdown flag flips to true.
    pub async fn serve(self, addr: SocketAddr, mut shutdown: watch::Receiver<bool>) -> ChainResult<()> {
        let app = self.create_router();
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            ChainError::network_with_source(format!("could not bind admin server to {}", addr), e)
        })?;
        info!("Admin server listening on {}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .map_err(|e| ChainError::network_with_source("admin server failed", e))?;
        info!("Admin server stopped");
        Ok(())
    }

    /// Liveness probe endpoint
    async fn health_live(State(server): State<Arc<Self>>) -> impl IntoResponse {
        let response = json!({
            "status": "alive",
            "service": server.service,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        (StatusCode::OK, Json(response))
    }

    /// Readiness probe endpoint
    async fn health_ready(State(server): State<Arc<Self>>) -> impl IntoResponse {
        // a controller-only process is ready as soon as it serves
        let is_ready = server.block.as_ref().map(|b| b.ready()).unwrap_or(true);
        let status_code = if is_ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };

        let response = json!({
            "status": if is_ready { "ready" } else { "not_ready" },
            "service": server.service,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        (status_code, Json(response))
    }

    /// Prometheus metrics endpoint
    async fn metrics(State(server): State<Arc<Self>>) -> impl IntoResponse {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Content-Type",
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        );

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        match encoder
            .encode(&server.registry.gather(), &mut buffer)
            .map_err(|e| e.to_string())
            .and_then(|_| String::from_utf8(buffer).map_err(|e| e.to_string()))
        {
            Ok(body) => (StatusCode::OK, headers, body),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, headers, e)
            }
        }
    }

    /// Current configuration endpoint
    async fn get_config(State(server): State<Arc<Self>>) -> impl IntoResponse {
        let Some(controller) = &server.controller else {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "not a controller"})));
        };
        match controller.current() {
            Some(config) => {
                let response = json!({
                    "generation": config.generation,
                    "config": config.as_ref(),
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::OK, Json(response))
            }
            None => {
                let response = json!({
                    "error": "no configuration published",
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::NOT_FOUND, Json(response))
            }
        }
    }

    /// Publish configuration endpoint
    async fn publish_config(
        State(server): State<Arc<Self>>,
        Json(candidate): Json<PipelineConfig>,
    ) -> impl IntoResponse {
        let Some(controller) = &server.controller else {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "not a controller"})));
        };
        match controller.publish(candidate).await {
            Ok(generation) => {
                let response = json!({
                    "message": "configuration published",
                    "generation": generation,
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::ACCEPTED, Json(response))
            }
            Err(e) => {
                error!("Failed to publish configuration: {}", e);
                let response = json!({
                    "error": e.to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::BAD_REQUEST, Json(response))
            }
        }
    }

    /// Acknowledgment table endpoint
    async fn list_acks(State(server): State<Arc<Self>>) -> impl IntoResponse {
        let Some(controller) = &server.controller else {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "not a controller"})));
        };
        let acks = controller.acks();
        let response = json!({
            "total": acks.len(),
            "acks": acks,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        (StatusCode::OK, Json(response))
    }

    /// DLQ inspection endpoint
    async fn list_dlq(State(server): State<Arc<Self>>) -> impl IntoResponse {
        let Some(store) = &server.dlq_store else {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "no DLQ store"})));
        };
        match store.scan().await {
            Ok(entries) => {
                let summaries: Vec<_> = entries
                    .iter()
                    .map(|entry| {
                        json!({
                            "batch_id": entry.batch.batch_id,
                            "stored_at": entry.stored_at.to_rfc3339(),
                            "payload_bytes": entry.batch.payload_size(),
                            "fb_sender": entry.batch.internal_labels.get(LABEL_FB_SENDER),
                            "error_code": entry.batch.internal_labels.get(LABEL_ERROR_CODE),
                            "replay_count": entry.batch.replay_count(),
                        })
                    })
                    .collect();
                let response = json!({
                    "total": summaries.len(),
                    "entries": summaries,
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::OK, Json(response))
            }
            Err(e) => {
                error!("Failed to scan DLQ: {}", e);
                let response = json!({
                    "error": e.to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(response))
            }
        }
    }

    /// Trigger one replay pass
    async fn trigger_replay(State(server): State<Arc<Self>>) -> impl IntoResponse {
        let Some(replay) = &server.replay else {
            return (StatusCode::NOT_FOUND, Json(json!({"error": "replay is not enabled"})));
        };
        match replay.replay_once().await {
            Ok(report) => {
                let response = json!({
                    "report": report,
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::OK, Json(response))
            }
            Err(e) => {
                error!("Replay pass failed: {}", e);
                let response = json!({
                    "error": e.to_string(),
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(response))
            }
        }
    }
}

impl Clone for AdminServer {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            registry: self.registry.clone(),
            block: self.block.clone(),
            controller: self.controller.clone(),
            dlq_store: self.dlq_store.clone(),
            replay: self.replay.clone(),
        }
    }
}
