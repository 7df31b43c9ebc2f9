use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use ethernity_apps::api;
use ethernity_apps::{AppState, LogMailer, Scheduler};
use ethernity_core::config::{StorageBackend, StorageConfig};
use ethernity_core::storage::StorageOptions;
use ethernity_core::{Clock, MemoryStorage, Settings, SledStorage, Storage, SystemClock};
use ethernity_ledger::{ChainSource, RpcClient};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the background jobs
    Serve,
    /// Capture today's analytics snapshot and exit
    Snapshot,
    /// Print the effective configuration
    Config,
}

fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    match config.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; data is lost on shutdown");
            Ok(Arc::new(MemoryStorage::new()))
        }
        StorageBackend::Sled => {
            let options = StorageOptions {
                sync_write: config.sync_writes,
                create_dirs: true,
            };
            let storage = SledStorage::open_with_options(&config.data_dir, options)
                .with_context(|| format!("failed to open database at {}", config.data_dir.display()))?;
            info!("Opened database at {}", config.data_dir.display());
            Ok(Arc::new(storage))
        }
    }
}

fn build_state(settings: Settings) -> Result<AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let storage = open_storage(&settings.storage)?;
    let mailer = Arc::new(LogMailer::new(&settings.mail, clock.clone()));

    let chain: Option<Arc<dyn ChainSource>> = if settings.features.blockchain_sync {
        let client = RpcClient::new(settings.blockchain.rpc_url.clone())
            .context("failed to create the JSON-RPC client")?;
        info!("Blockchain sync enabled against {}", client.url());
        let chain: Arc<dyn ChainSource> = Arc::new(client);
        Some(chain)
    } else {
        None
    };

    Ok(AppState::new(settings, storage, clock, mailer, chain))
}

async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
    let _ = tx.send(true);
}

async fn serve(settings: Settings) -> Result<()> {
    let addr: SocketAddr = settings
        .server
        .bind_address()
        .parse()
        .context("invalid server host or port")?;
    let state = build_state(settings)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = Scheduler::new(state.clone()).start(shutdown_rx);
    info!("Started {} background jobs", jobs.len());

    let app = api::router(state.clone());
    info!(
        "{} listening on {} ({})",
        state.settings.project_name, addr, state.settings.environment
    );

    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    jobs.join().await;
    info!("Shutdown complete");
    Ok(())
}

async fn snapshot(settings: Settings) -> Result<()> {
    let state = build_state(settings)?;
    let snapshot = Scheduler::new(state).create_daily_snapshot().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn print_config(settings: &Settings) -> Result<()> {
    let mut redacted = settings.clone();
    redacted.security.secret_key = "***".to_string();
    redacted.security.admin_password = "***".to_string();
    if !redacted.security.admin_token.is_empty() {
        redacted.security.admin_token = "***".to_string();
    }
    println!("{}", serde_json::to_string_pretty(&redacted)?);
    for warning in settings.validate() {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load configuration")?;

    if let Err(e) = ethernity_core::init_tracing(&settings.log_level) {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            settings.validate();
            serve(settings).await
        }
        Commands::Snapshot => snapshot(settings).await,
        Commands::Config => print_config(&settings),
    }
}
