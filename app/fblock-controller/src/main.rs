//! Config controller main binary
//!
//! Serves the config stream to stage processes and an admin HTTP surface for
//! publishing candidates and inspecting acks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use prometheus::Registry;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fblock_core::{PipelineConfig, DEFAULT_CONTROLLER_ADDR, FBLOCK_VERSION};
use fblock_runtime::{
    shutdown_signal, AdminServer, ConfigController, ControllerServer, ControllerService,
};

#[derive(Parser)]
#[command(name = "fblock-controller")]
#[command(about = "Function-block pipeline config controller")]
#[command(version = FBLOCK_VERSION)]
struct Cli {
    /// Config service listen address
    #[arg(long, env = "FBLOCK_LISTEN_ADDR", default_value = DEFAULT_CONTROLLER_ADDR)]
    listen_addr: SocketAddr,

    /// Admin (probes, publish API, acks) listen address
    #[arg(long, env = "FBLOCK_ADMIN_ADDR", default_value = "0.0.0.0:7510")]
    admin_addr: SocketAddr,

    /// TOML file the published configuration is persisted to and restored from
    #[arg(long, env = "FBLOCK_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Pipeline candidate (TOML) published at boot when nothing is published yet
    #[arg(long, env = "FBLOCK_BOOTSTRAP")]
    bootstrap: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    info!("Starting fblock controller v{}", FBLOCK_VERSION);

    let controller = Arc::new(match &cli.state_file {
        Some(path) => ConfigController::with_state_file(path.clone())
            .await
            .context("could not restore controller state")?,
        None => ConfigController::new(),
    });

    if let Some(path) = &cli.bootstrap {
        if controller.current().is_none() {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("could not read bootstrap file '{}'", path.display()))?;
            let candidate: PipelineConfig =
                toml::from_str(&raw).context("could not parse bootstrap candidate")?;
            let generation = controller.publish(candidate).await?;
            info!("Published bootstrap candidate as generation {}", generation);
        } else {
            info!("Skipping bootstrap candidate; state already holds a publication");
        }
    }

    let server = ControllerServer::new(cli.listen_addr, ControllerService::new(controller.clone()));
    let admin = AdminServer::new("fblock-controller", Registry::new())
        .with_controller(controller.clone());

    let (shutdown_tx, _) = tokio::sync::watch::channel(false);

    info!("Starting config service on {}", cli.listen_addr);
    let grpc_shutdown = shutdown_tx.subscribe();
    let grpc = tokio::spawn(async move {
        if let Err(e) = server.serve(grpc_shutdown).await {
            error!("Config service failed: {}", e);
        }
    });

    info!("Starting admin server on {}", cli.admin_addr);
    let admin_addr = cli.admin_addr;
    let admin_shutdown = shutdown_tx.subscribe();
    let admin_task = tokio::spawn(async move {
        if let Err(e) = admin.serve(admin_addr, admin_shutdown).await {
            error!("Admin server failed: {}", e);
        }
    });

    // Handle shutdown signals
    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = grpc.await {
        error!("Config service task failed: {}", e);
    }
    if let Err(e) = admin_task.await {
        error!("Admin server task failed: {}", e);
    }

    info!("Config controller stopped");
    Ok(())
}
