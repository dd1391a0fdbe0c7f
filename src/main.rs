//! Ledger Gateway Server Binary

use clap::Parser;
use ledger_gateway::{
    api::GatewayServer,
    build_app_state,
    config::{GatewayConfig, NetworkMode},
    network::SimulatedNetwork,
    storage::RocksBlockStore,
    webhook::WebhookNotifier,
};
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ledger-gateway")]
#[command(about = "HTTP gateway for a permissioned ledger network", long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the block record database directory
    #[arg(long)]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match GatewayConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db_path) = args.db_path {
        config.storage.data_directory = db_path;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_filter.clone().into()),
        )
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("🚀 Starting ledger gateway");

    let factory = match config.network.mode {
        NetworkMode::Simulated => {
            info!("   Network: in-process simulated ledger");
            SimulatedNetwork::new()
        }
    };

    info!("📂 Opening block record store: {}", config.storage.data_directory);
    let store = Arc::new(RocksBlockStore::open(&config.storage.data_directory)?);
    let notifier = Arc::new(WebhookNotifier::new(config.webhook_timeout())?);

    let state = build_app_state(&config, &factory, store, notifier).await?;
    info!("✅ {} organization session(s) ready", state.sessions.len());

    let result = GatewayServer::new(config.server.clone(), state.clone()).run().await;

    state.sessions.close_all().await;
    info!("Organization sessions closed");
    result
}
