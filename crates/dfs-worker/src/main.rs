use anyhow::Result;
use clap::Parser;
use dfs_common::config::WorkerConfig;
use dfs_worker::{DataNodeServer, IntegrityChecker, WorkerNode, WorkerNodeState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "dfs-worker")]
#[command(about = "DFS data-node storing checksummed blocks")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/dfs/worker.toml")]
    config: String,

    /// Bind address for the RPC server
    #[arg(long)]
    bind_address: Option<String>,

    /// Bind address for the HTTP read path
    #[arg(long)]
    http_bind_address: Option<String>,

    /// Block storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Address advertised to the coordinator
    #[arg(long)]
    advertise_address: Option<String>,

    /// Seconds between integrity scans
    #[arg(long)]
    integrity_interval: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(if cli.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting DFS worker");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = WorkerConfig::load_or_default(&cli.config).await?;
    config.apply_env_overrides();

    if let Some(bind_address) = cli.bind_address {
        config.bind_address = bind_address;
    }
    if let Some(http_bind_address) = cli.http_bind_address {
        config.http_bind_address = http_bind_address;
    }
    if let Some(storage_dir) = cli.storage_dir {
        config.storage_dir = storage_dir;
    }
    if let Some(advertise_address) = cli.advertise_address {
        config.advertise_address = Some(advertise_address);
    }
    if let Some(interval) = cli.integrity_interval {
        config.integrity_check_interval_secs = interval;
    }

    tokio::fs::create_dir_all(&config.storage_dir).await?;
    let state_path = config.state_path();
    let mut state = WorkerNodeState::load(&state_path).await?;
    let worker_id = config.worker_id.or(state.id).unwrap_or_else(Uuid::new_v4);

    let worker = Arc::new(WorkerNode::new(&config, worker_id).await?);
    info!("Worker ID: {}", worker.id());
    info!("Storage directory: {}", config.storage_dir.display());
    info!("Previously stored blocks: {}", state.stored_blocks.len());

    let mut integrity_checker = IntegrityChecker::new(worker.clone(), config.integrity_check_interval());
    integrity_checker.start();

    let http_listener = TcpListener::bind(&config.http_bind_address).await?;
    let (http_shutdown_tx, http_shutdown_rx) = oneshot::channel::<()>();
    let http_worker = worker.clone();
    let http_handle = tokio::spawn(async move {
        let shutdown = async {
            let _ = http_shutdown_rx.await;
        };
        if let Err(e) = dfs_worker::http::serve(http_listener, http_worker, shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    let server = DataNodeServer::new(worker.clone(), config.network.clone());
    let bind_address = config.bind_address.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(&bind_address).await {
            error!("RPC server error: {}", e);
        }
    });

    info!("DFS worker started, ready to serve blocks");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = terminate() => {
            info!("Received SIGTERM");
        }
        _ = server_handle => {
            error!("RPC server task completed unexpectedly");
        }
    }

    integrity_checker.stop().await;
    let _ = http_shutdown_tx.send(());
    if let Err(e) = http_handle.await {
        warn!("HTTP server task failed: {}", e);
    }

    state.update(&worker).await?;
    state.save(&state_path).await?;

    info!("DFS worker shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
