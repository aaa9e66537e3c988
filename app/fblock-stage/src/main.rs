//! Pipeline stage main binary
//!
//! Runs one function block (gateway, relay, or DLQ) together with its
//! chain-push server, admin surface, and controller subscription.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use prometheus::Registry;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fblock_core::{
    FunctionBlock, RetryConfig, StageMetrics, DEFAULT_ADMIN_ADDR, DEFAULT_CONTROLLER_ENDPOINT,
    DEFAULT_PUSH_ADDR, FBLOCK_VERSION,
};
use fblock_runtime::{
    shutdown_signal, AdminServer, ChainForwarder, ChainPush, DlqStage, DlqStore, FileDlqStore,
    ForwarderConfig, GatewayStage, LoggingExporter, RelayStage, ReplayConfig, ReplayDriver,
    StageRuntime, StructuralValidator, SubscriberConfig,
};

/// Which function block this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StageKind {
    /// Validate incoming batches and export the clean ones
    Gateway,
    /// Forward batches to the next stage
    Relay,
    /// Persist dead-lettered batches and replay them
    Dlq,
}

#[derive(Parser)]
#[command(name = "fblock-stage")]
#[command(about = "Function-block pipeline stage")]
#[command(version = FBLOCK_VERSION)]
struct Cli {
    /// Stage kind to run
    #[arg(long, value_enum, env = "FBLOCK_KIND")]
    kind: StageKind,

    /// Function-block name, matching its key in the pipeline config
    #[arg(long, env = "FBLOCK_NAME")]
    name: String,

    /// Instance id reported to the controller; generated when omitted
    #[arg(long, env = "FBLOCK_INSTANCE_ID")]
    instance_id: Option<String>,

    /// Chain-push listen address
    #[arg(long, env = "FBLOCK_PUSH_ADDR", default_value = DEFAULT_PUSH_ADDR)]
    push_addr: SocketAddr,

    /// Admin (probes + metrics) listen address
    #[arg(long, env = "FBLOCK_ADMIN_ADDR", default_value = DEFAULT_ADMIN_ADDR)]
    admin_addr: SocketAddr,

    /// Config controller endpoint
    #[arg(
        long,
        env = "FBLOCK_CONTROLLER_ENDPOINT",
        default_value = DEFAULT_CONTROLLER_ENDPOINT
    )]
    controller_endpoint: String,

    /// Downstream chain-push endpoint (relay only)
    #[arg(long, env = "FBLOCK_DOWNSTREAM")]
    downstream: Option<String>,

    /// DLQ stage chain-push endpoint for failure hand-off
    #[arg(long, env = "FBLOCK_DLQ_ENDPOINT")]
    dlq_endpoint: Option<String>,

    /// Directory backing the DLQ store (dlq only)
    #[arg(long, env = "FBLOCK_DLQ_DIR", default_value = "dlq-data")]
    dlq_dir: PathBuf,

    /// Head-of-chain endpoint replayed batches are pushed to (dlq only)
    #[arg(long, env = "FBLOCK_REPLAY_TARGET")]
    replay_target: Option<String>,

    /// Seconds between replay passes; 0 disables the loop (dlq only)
    #[arg(long, env = "FBLOCK_REPLAY_INTERVAL", default_value = "60")]
    replay_interval_secs: u64,

    /// Forwarding attempts per batch before giving up
    #[arg(long, env = "FBLOCK_MAX_ATTEMPTS", default_value = "3")]
    max_attempts: u32,
}

/// Dial an optional chain-push endpoint.
fn dial(endpoint: Option<&str>) -> Result<Option<Arc<dyn ChainPush>>> {
    match endpoint {
        Some(endpoint) => {
            let forwarder = ChainForwarder::new(ForwarderConfig::new(endpoint))?;
            Ok(Some(Arc::new(forwarder)))
        }
        None => Ok(None),
    }
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
    info!("Starting fblock stage '{}' v{}", cli.name, FBLOCK_VERSION);

    let registry = Registry::new();
    let metrics = StageMetrics::new(&registry).context("could not register stage metrics")?;

    let retry = RetryConfig {
        max_attempts: cli.max_attempts,
        ..Default::default()
    };
    let dlq_push = dial(cli.dlq_endpoint.as_deref())?;

    let mut dlq_store: Option<Arc<dyn DlqStore>> = None;
    let mut replay: Option<Arc<ReplayDriver>> = None;

    let block: Arc<dyn FunctionBlock> = match cli.kind {
        StageKind::Gateway => Arc::new(GatewayStage::new(
            cli.name.clone(),
            Arc::new(StructuralValidator::new()?),
            Arc::new(LoggingExporter),
            dlq_push,
            retry,
            metrics.clone(),
        )),
        StageKind::Relay => {
            let Some(downstream) = cli.downstream.as_deref() else {
                bail!("--downstream is required for a relay stage");
            };
            let forwarder = Arc::new(ChainForwarder::new(ForwarderConfig::new(downstream))?);
            Arc::new(RelayStage::new(
                cli.name.clone(),
                forwarder,
                dlq_push,
                retry,
                metrics.clone(),
            ))
        }
        StageKind::Dlq => {
            let store = Arc::new(FileDlqStore::new(cli.dlq_dir.clone()).await?);
            if let Some(target) = cli.replay_target.as_deref() {
                let head = Arc::new(ChainForwarder::new(ForwarderConfig::new(target))?);
                replay = Some(Arc::new(ReplayDriver::new(
                    store.clone(),
                    head,
                    ReplayConfig::default(),
                    metrics.clone(),
                )));
            }
            dlq_store = Some(store.clone());
            Arc::new(DlqStage::new(cli.name.clone(), store, metrics.clone()))
        }
    };

    let mut runtime = StageRuntime::new(Arc::clone(&block));
    runtime.initialize().await.context("stage initialization failed")?;

    let mut admin = AdminServer::new(cli.name.clone(), registry).with_block(Arc::clone(&block));
    if let Some(store) = dlq_store {
        admin = admin.with_dlq(store, replay.clone());
    }

    runtime.spawn_push_server(cli.push_addr, metrics.clone());
    runtime.spawn_admin_server(cli.admin_addr, admin);
    runtime.spawn_subscriber(SubscriberConfig {
        controller_endpoint: cli.controller_endpoint.clone(),
        fb_id: cli.name.clone(),
        instance_id: cli
            .instance_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    });
    if let Some(driver) = replay {
        if cli.replay_interval_secs > 0 {
            runtime.spawn_replay(driver, Duration::from_secs(cli.replay_interval_secs));
        }
    }

    // Handle shutdown signals
    shutdown_signal().await;

    runtime.shutdown().await.context("stage shutdown failed")?;
    info!("Stage '{}' stopped", cli.name);
    Ok(())
}
