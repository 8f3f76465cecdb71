use anyhow::Result;
use clap::Parser;
use dfs_common::config::MasterConfig;
use dfs_master::{CoordinatorServer, LoadBalancer, MasterNode, Replicator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "dfs-master")]
#[command(about = "DFS coordinator managing the namespace and block placement")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/dfs/master.toml")]
    config: String,

    /// Bind address for the RPC server
    #[arg(long)]
    bind_address: Option<String>,

    /// Directory for the snapshot and operation log
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Comma separated worker addresses (overrides discovery by pattern)
    #[arg(long, value_delimiter = ',')]
    workers: Vec<String>,

    /// Replicate the operation log to peer coordinators
    #[arg(long)]
    replicate: bool,

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

    info!("Starting DFS master");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = MasterConfig::load_or_default(&cli.config).await?;
    config.apply_env_overrides();

    if let Some(bind_address) = cli.bind_address {
        config.bind_address = bind_address;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if !cli.workers.is_empty() {
        config.discovery.static_addresses = cli.workers;
    }
    if cli.replicate {
        config.replication.enabled = true;
    }
    config.validate()?;

    let load_balancer = Arc::new(LoadBalancer::discover(&config.discovery, &config.network).await);
    info!("Discovered {} workers", load_balancer.len());

    let hostname = std::env::var("HOSTNAME").unwrap_or_default();
    let replicator = Replicator::from_config(&config.replication, &config.network, &hostname);

    let master = Arc::new(MasterNode::open(&config, load_balancer.clone(), replicator).await?);
    info!("Master ID: {}", master.id());
    info!("Data directory: {}", config.data_dir.display());

    let server = CoordinatorServer::new(master.clone(), config.network.clone());
    let bind_address = config.bind_address.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(&bind_address).await {
            error!("RPC server error: {}", e);
        }
    });

    info!("DFS master started");

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

    let (files, blocks) = master.stats().await;
    info!("Saving snapshot of {} files and {} blocks", files, blocks);
    if let Err(e) = master.snapshot().await {
        error!("Failed to save snapshot: {}", e);
    }
    load_balancer.close();

    let metrics = master.metrics().snapshot();
    info!(
        "Served {} allocations, {} commits, {} deletes, {} lookups",
        metrics.blocks_allocated, metrics.files_committed, metrics.files_deleted, metrics.metadata_lookups
    );
    info!("DFS master shutdown complete");
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
