// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use bridgewatch::config::WatchConfig;
use bridgewatch::node::run_node;
use bridgewatch::store::EventStore;
use bridgewatch::subscriber::backfill::BackfillScanner;
use clap::{Parser, Subcommand};
use ethers::types::Address;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "bridgewatch", rename_all = "kebab-case")]
struct Args {
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the event listener, attestation writer and autonomous agent
    Run,
    /// Scan a historical block range and store any bridge events found
    Backfill {
        #[clap(long)]
        from_block: u64,
        #[clap(long)]
        to_block: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = WatchConfig::from_env()?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Backfill {
            from_block,
            to_block,
        } => backfill(config, from_block, to_block).await,
    }
}

async fn run(config: WatchConfig) -> anyhow::Result<()> {
    info!("Starting BridgeWatch");
    info!("Monitoring bridge contract: {}", config.bridge_contract);

    let registry = prometheus::Registry::new();
    let cancel = CancellationToken::new();
    let handles = run_node(config, registry, cancel.clone()).await?;

    wait_for_shutdown().await;
    info!("Shutdown signal received, stopping");
    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Task join error: {:?}", e);
        }
    }
    info!("BridgeWatch stopped");
    Ok(())
}

async fn backfill(config: WatchConfig, from_block: u64, to_block: u64) -> anyhow::Result<()> {
    let store = EventStore::connect(&config.database_url).await?;
    let contract: Address = config.bridge_contract.parse()?;
    let scanner = BackfillScanner::new(config.scan_rpc_url(), contract)?;
    let summary = scanner.scan_range(&store, from_block, to_block).await?;
    info!(
        "Backfill finished: {} inserted, {} duplicates, {} chunks skipped, {} decode errors",
        summary.inserted, summary.duplicates, summary.failed_chunks, summary.decode_errors
    );
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {:?}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {:?}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
