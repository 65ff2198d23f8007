//! SQL Cache - A distributed cache and session store backed by one SQL table
//!
//! `sql_cache serve` (the default) runs the HTTP server; `sql_cache provision`
//! creates the cache table and its expiration index.

use std::net::SocketAddr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sql_cache::api::create_router;
use sql_cache::cache::{CacheStore, MIN_SWEEP_INTERVAL};
use sql_cache::{spawn_sweep_task, AppState, Config};

#[derive(Debug, Parser)]
#[command(name = "sql_cache", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP cache server
    Serve,
    /// Create the cache table and index if they do not exist
    Provision,
}

/// Main entry point for the SQL cache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Open the connection pool and probe the cache table
/// 4. Start the background sweep tick
/// 5. Create Axum router with all endpoints
/// 6. Start HTTP server on configured port
/// 7. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sql_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = Config::from_env();
    config.validate().context("invalid configuration")?;
    info!(
        "Configuration loaded: database={:?}, table={}, policy={}, sweep_interval={}s, port={}",
        config.database_path,
        config.table_name,
        config.policy,
        config.sweep_interval,
        config.server_port
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Provision => provision(&config),
    }
}

fn provision(config: &Config) -> anyhow::Result<()> {
    let store = CacheStore::from_config(config).context("failed to open the database")?;
    if store.provision().context("failed to create the cache table")? {
        info!("Cache table {} created", config.table_name);
    } else {
        info!("Cache table {} already exists, nothing to do", config.table_name);
    }
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!("Starting SQL Cache Server");

    let state = AppState::from_config(&config).context("failed to open the cache store")?;

    // Advisory only: the server still starts if the table is not reachable yet
    if let Err(e) = state.cache.connect_async().await {
        warn!("Cache store probe failed, continuing: {}", e);
    }

    let sweep_handle = spawn_sweep_task(state.cache.clone(), MIN_SWEEP_INTERVAL);
    info!("Background sweep tick started");

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweep_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the sweep tick and allows graceful shutdown.
async fn shutdown_signal(sweep_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    sweep_handle.abort();
    warn!("Sweep tick aborted");
}
