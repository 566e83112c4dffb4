//! Airwave Server - standalone headless radio server.
//!
//! This binary hosts the shared radio: the vote queue, the cron scheduler,
//! the pre-fetch pipeline and the listener WebSocket fan-out. It's designed
//! for server deployments where Airwave runs as a background daemon.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use airwave_core::{bootstrap_services, start_server, AppState};
use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use tokio::signal;

use crate::config::ServerConfig;

/// Airwave Server - vote-driven shared radio broadcaster.
#[derive(Parser, Debug)]
#[command(name = "airwave-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "AIRWAVE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "AIRWAVE_BIND_PORT")]
    port: Option<u16>,

    /// Data directory for persisted state (overrides config file).
    #[arg(short = 'd', long, env = "AIRWAVE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Offline music library directory (overrides config file).
    #[arg(short = 'l', long, env = "AIRWAVE_LIBRARY_DIR")]
    library_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Airwave Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(library_dir) = args.library_dir {
        config.library_dir = library_dir;
    }

    log::info!(
        "Configuration: bind_port={}, data_dir={}, library_dir={}, extractor={}",
        config.bind_port,
        config.data_dir.display(),
        config.library_dir.display(),
        config.extractor_bin
    );

    // Bootstrap services
    let core_config = config.to_core_config();
    let services = bootstrap_services(&core_config).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    // Register schedule jobs and caches. A persistence failure here means the
    // server cannot honor its schedules - abort startup.
    services
        .start_background_tasks()
        .await
        .context("Failed to start scheduler")?;

    log::info!("Background tasks started");

    // Build app state for the HTTP server
    let app_state = AppState::new(&services, Arc::new(RwLock::new(core_config)));

    // Spawn HTTP server on the main tokio runtime
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server started on port {}", config.bind_port);

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown
    services.shutdown().await;

    // Abort the server task (it will have stopped when the services shut down)
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
