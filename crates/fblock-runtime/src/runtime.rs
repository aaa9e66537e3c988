//! SPDX-FileCopyrightText: © 2025 fblock contributors
//! SPDX-License-Identifier: Apache-2.0
//!

//! Stage process orchestration
//!
//! One `StageRuntime` owns a function block plus the servers and background
//! loops serving it. Every component is a named tokio task sharing a single
//! shutdown channel; `shutdown` flips the channel, waits for the tasks under
//! one grace deadline, and drains the block last so in-flight batches finish
//! before outbound connections close.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

use fblock_core::{ChainResult, FunctionBlock, StageMetrics};

use crate::dlq::ReplayDriver;
use crate::http::AdminServer;
use crate::server::{PushServer, StagePushService};
use crate::subscriber::{ConfigSubscriber, SubscriberConfig};

/// Default time to wait for spawned components during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Owns a function block and the tasks that serve it.
pub struct StageRuntime {
    name: String,
    block: Arc<dyn FunctionBlock>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
    grace: Duration,
}

impl StageRuntime {
    pub fn new(block: Arc<dyn FunctionBlock>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name: block.name().to_string(),
            block,
            shutdown_tx,
            handles: Vec::new(),
            grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// The block this runtime serves.
    pub fn block(&self) -> Arc<dyn FunctionBlock> {
        Arc::clone(&self.block)
    }

    /// Receiver on the runtime's shutdown channel, for components wired up
    /// outside the runtime.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Initialize the block before anything is served.
    pub async fn initialize(&self) -> ChainResult<()> {
        info!("Initializing stage runtime for '{}'", self.name);
        self.block.initialize().await
    }

    /// Spawn the chain-push gRPC server.
    pub fn spawn_push_server(&mut self, addr: SocketAddr, metrics: StageMetrics) {
        let service = StagePushService::new(Arc::clone(&self.block), metrics);
        let server = PushServer::new(addr, service);
        let shutdown = self.shutdown_tx.subscribe();
        info!("Starting chain-push server for '{}' on {}", self.name, addr);
        self.spawn_component("push-server", async move {
            if let Err(e) = server.serve(shutdown).await {
                error!("Chain-push server failed: {}", e);
            }
        });
    }

    /// Spawn the admin HTTP server.
    pub fn spawn_admin_server(&mut self, addr: SocketAddr, server: AdminServer) {
        let shutdown = self.shutdown_tx.subscribe();
        info!("Starting admin server for '{}' on {}", self.name, addr);
        self.spawn_component("admin-server", async move {
            if let Err(e) = server.serve(addr, shutdown).await {
                error!("Admin server failed: {}", e);
            }
        });
    }

    /// Spawn the configuration subscriber.
    pub fn spawn_subscriber(&mut self, config: SubscriberConfig) {
        let subscriber = ConfigSubscriber::new(config, Arc::clone(&self.block));
        let shutdown = self.shutdown_tx.subscribe();
        info!("Starting config subscriber for '{}'", self.name);
        self.spawn_component("config-subscriber", async move {
            subscriber.run(shutdown).await;
        });
    }

    /// Spawn the periodic DLQ replay loop.
    pub fn spawn_replay(&mut self, driver: Arc<ReplayDriver>, every: Duration) {
        let shutdown = self.shutdown_tx.subscribe();
        info!(
            "Starting DLQ replay loop for '{}' every {:?}",
            self.name, every
        );
        self.spawn_component("dlq-replay", async move {
            driver.run_interval(every, shutdown).await;
        });
    }

    fn spawn_component<F>(&mut self, component: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push((component, tokio::spawn(task)));
    }

    /// Stop every spawned component, then drain the block.
    ///
    /// Components share one grace deadline; whatever has not finished when it
    /// passes is aborted.
    pub async fn shutdown(self) -> ChainResult<()> {
        info!("Stopping stage runtime for '{}'", self.name);

        let _ = self.shutdown_tx.send(true);

        let deadline = Instant::now() + self.grace;
        for (component, mut handle) in self.handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Component '{}' panicked during shutdown: {}", component, e);
                }
                Err(_) => {
                    error!(
                        "Component '{}' did not stop within {:?}, aborting",
                        component, self.grace
                    );
                    handle.abort();
                }
            }
        }

        self.block.shutdown().await?;

        info!("Stage runtime for '{}' stopped", self.name);
        Ok(())
    }
}

/// Handle shutdown signals
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }

    info!("Shutdown signal received");
}
