//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Configuration controller
//!
//! Holds the authoritative pipeline configuration, assigns generation
//! numbers, and distributes updates to every subscribed stage. Generations
//! only ever grow: a stream never carries a generation at or below the last
//! one it delivered, and a slow subscriber simply skips straight to the
//! newest. Publication is all-or-nothing; when a state file is configured
//! the candidate is persisted before it becomes visible.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fblock_core::{ChainError, ChainResult, PipelineConfig};
use fblock_proto as proto;
use fblock_proto::{ConfigService, ConfigServiceServer};

/// Latest configuration acknowledgment from one stage instance.
#[derive(Debug, Clone, Serialize)]
pub struct AckRecord {
    pub fb_id: String,
    pub instance_id: String,
    pub generation: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub acked_at: DateTime<Utc>,
}

/// Authoritative configuration state plus the ack table.
pub struct ConfigController {
    state_path: Option<PathBuf>,
    current: watch::Sender<Option<Arc<PipelineConfig>>>,
    publish_lock: tokio::sync::Mutex<()>,
    acks: Mutex<HashMap<(String, String), AckRecord>>,
}

impl ConfigController {
    /// In-memory controller; published configurations do not survive restart.
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            state_path: None,
            current,
            publish_lock: tokio::sync::Mutex::new(()),
            acks: Mutex::new(HashMap::new()),
        }
    }

    /// Controller backed by a TOML state file. An existing file seeds the
    /// current configuration so generations keep growing across restarts.
    pub async fn with_state_file(path: impl Into<PathBuf>) -> ChainResult<Self> {
        let path = path.into();
        let controller = Self {
            state_path: Some(path.clone()),
            ..Self::new()
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let config: PipelineConfig = toml::from_str(&raw).map_err(|e| {
                    ChainError::invalid_config_with_source(
                        format!("could not parse controller state '{}'", path.display()),
                        e,
                    )
                })?;
                config.validate()?;
                info!(
                    "Controller restored configuration generation {} from '{}'",
                    config.generation,
                    path.display()
                );
                controller.current.send_replace(Some(Arc::new(config)));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Controller starting with no published configuration");
            }
            Err(e) => {
                return Err(ChainError::internal_with_source(
                    format!("could not read controller state '{}'", path.display()),
                    e,
                ))
            }
        }
        Ok(controller)
    }

    /// Currently published configuration, if any.
    pub fn current(&self) -> Option<Arc<PipelineConfig>> {
        self.current.borrow().clone()
    }

    /// Generation of the published configuration, zero before the first
    /// publication.
    pub fn generation(&self) -> u64 {
        self.current().map(|c| c.generation).unwrap_or(0)
    }

    /// Watch handle for config streams and in-process subscribers.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<PipelineConfig>>> {
        self.current.subscribe()
    }

    /// Validate, persist, and publish a candidate under the next generation.
    ///
    /// The caller's generation field is ignored; the controller is the only
    /// writer of generation numbers.
    pub async fn publish(&self, mut candidate: PipelineConfig) -> ChainResult<u64> {
        let _guard = self.publish_lock.lock().await;
        let next = self.generation() + 1;
        candidate.generation = next;
        candidate.validate()?;
        if let Some(path) = &self.state_path {
            self.persist(path, &candidate).await?;
        }
        self.current.send_replace(Some(Arc::new(candidate)));
        info!("Controller published configuration generation {}", next);
        Ok(next)
    }

    async fn persist(&self, path: &Path, config: &PipelineConfig) -> ChainResult<()> {
        let raw = toml::to_string_pretty(config).map_err(|e| {
            ChainError::serialization_with_source("could not encode controller state", e)
        })?;
        let tmp = path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, raw).await.map_err(|e| {
            ChainError::internal_with_source(
                format!("could not write controller state '{}'", tmp.display()),
                e,
            )
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            ChainError::internal_with_source(
                format!("could not persist controller state '{}'", path.display()),
                e,
            )
        })?;
        Ok(())
    }

    /// Record a stage's apply outcome, keeping the latest per instance.
    pub fn record_ack(&self, record: AckRecord) {
        if record.success {
            info!(
                "Stage '{}/{}' acknowledged generation {}",
                record.fb_id, record.instance_id, record.generation
            );
        } else {
            warn!(
                "Stage '{}/{}' failed to apply generation {}: {}",
                record.fb_id,
                record.instance_id,
                record.generation,
                record.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        self.acks.lock().insert(
            (record.fb_id.clone(), record.instance_id.clone()),
            record,
        );
    }

    /// Latest ack per stage instance, in stable order.
    pub fn acks(&self) -> Vec<AckRecord> {
        let mut records: Vec<_> = self.acks.lock().values().cloned().collect();
        records.sort_by(|a, b| {
            (a.fb_id.as_str(), a.instance_id.as_str())
                .cmp(&(b.fb_id.as_str(), b.instance_id.as_str()))
        });
        records
    }
}

impl Default for ConfigController {
    fn default() -> Self {
        Self::new()
    }
}

/// `ConfigService` implementation backed by a `ConfigController`.
pub struct ControllerService {
    controller: Arc<ConfigController>,
}

impl ControllerService {
    pub fn new(controller: Arc<ConfigController>) -> Self {
        Self { controller }
    }

    fn update_for(
        config: &PipelineConfig,
        current_generation: u64,
    ) -> ChainResult<proto::ConfigUpdate> {
        if config.generation <= current_generation {
            // requester already current; no payload
            return Ok(proto::ConfigUpdate {
                status: proto::ConfigStatus::Ok as i32,
                generation: config.generation,
                config: None,
            });
        }
        let wire = proto::PipelineConfig::try_from(config)?;
        Ok(proto::ConfigUpdate {
            status: proto::ConfigStatus::Ok as i32,
            generation: config.generation,
            config: Some(wire),
        })
    }
}

#[tonic::async_trait]
impl ConfigService for ControllerService {
    async fn get_config(
        &self,
        request: Request<proto::GetConfigRequest>,
    ) -> Result<Response<proto::ConfigUpdate>, Status> {
        let req = request.into_inner();
        debug!(
            "GetConfig from '{}/{}' at generation {}",
            req.fb_id, req.instance_id, req.current_generation
        );
        let update = match self.controller.current() {
            None => proto::ConfigUpdate {
                status: proto::ConfigStatus::Ok as i32,
                generation: 0,
                config: None,
            },
            Some(config) => Self::update_for(&config, req.current_generation)
                .map_err(|e| Status::internal(e.to_string()))?,
        };
        Ok(Response::new(update))
    }

    type StreamConfigStream = ReceiverStream<Result<proto::ConfigUpdate, Status>>;

    async fn stream_config(
        &self,
        request: Request<proto::StreamConfigRequest>,
    ) -> Result<Response<Self::StreamConfigStream>, Status> {
        let req = request.into_inner();
        info!(
            "Stage '{}/{}' subscribed for configuration (at generation {})",
            req.fb_id, req.instance_id, req.current_generation
        );

        let mut updates = self.controller.subscribe();
        let (tx, stream) = mpsc::channel(16);
        let mut last_sent = req.current_generation;
        let subscriber = format!("{}/{}", req.fb_id, req.instance_id);

        tokio::spawn(async move {
            loop {
                // borrow_and_update marks the latest value seen, so a
                // publication racing the subscription is never lost
                let snapshot = updates.borrow_and_update().clone();
                if let Some(config) = snapshot {
                    if config.generation > last_sent {
                        let update = match Self::update_for(&config, last_sent) {
                            Ok(update) => update,
                            Err(e) => {
                                error!(
                                    "Could not encode configuration generation {} for '{}': {}",
                                    config.generation, subscriber, e
                                );
                                break;
                            }
                        };
                        if tx.send(Ok(update)).await.is_err() {
                            break;
                        }
                        last_sent = config.generation;
                    }
                }
                if updates.changed().await.is_err() {
                    break;
                }
            }
            debug!("Config stream to '{}' closed", subscriber);
        });

        Ok(Response::new(ReceiverStream::new(stream)))
    }

    async fn ack_config(
        &self,
        request: Request<proto::AckConfigRequest>,
    ) -> Result<Response<proto::AckConfigResponse>, Status> {
        let req = request.into_inner();
        if req.fb_id.is_empty() {
            return Err(Status::invalid_argument("fb_id is required"));
        }
        self.controller.record_ack(AckRecord {
            fb_id: req.fb_id,
            instance_id: req.instance_id,
            generation: req.applied_generation,
            success: req.success,
            error_message: if req.error_message.is_empty() {
                None
            } else {
                Some(req.error_message)
            },
            acked_at: Utc::now(),
        });
        Ok(Response::new(proto::AckConfigResponse {
            status: proto::ConfigStatus::Ok as i32,
            error_message: String::new(),
        }))
    }
}

/// gRPC server wrapper for the controller's config surface.
pub struct ControllerServer {
    addr: SocketAddr,
    service: ControllerService,
}

impl ControllerServer {
    pub fn new(addr: SocketAddr, service: ControllerService) -> Self {
        Self { addr, service }
    }

    /// Serve until the shutdown flag flips to true.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> ChainResult<()> {
        info!("Config controller listening on {}", self.addr);
        Server::builder()
            .add_service(ConfigServiceServer::new(self.service))
            .serve_with_shutdown(self.addr, async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .map_err(|e| ChainError::network_with_source("config controller server failed", e))?;
        info!("Config controller stopped");
        Ok(())
    }
}
