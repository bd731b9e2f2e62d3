//! SyncDeck Server - headless host for the SyncDeck web client.
//!
//! Serves the media library and API, and supervises one external
//! synchronized-playback client on behalf of connected browsers.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use syncdeck_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// SyncDeck Server - drive a synchronized-playback client from the browser.
#[derive(Parser, Debug)]
#[command(name = "syncdeck-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SYNCDECK_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file; 0 probes 8000-8010).
    #[arg(short = 'p', long, env = "SYNCDECK_BIND_PORT")]
    port: Option<u16>,

    /// Media library directory (overrides config file).
    #[arg(short = 'm', long, env = "SYNCDECK_MEDIA_ROOT")]
    media_root: Option<PathBuf>,

    /// Player executable (overrides config file).
    #[arg(long, env = "SYNCDECK_PLAYER_BINARY")]
    player_binary: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("SyncDeck Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(media_root) = args.media_root {
        config.media_root = media_root;
    }
    if let Some(player_binary) = args.player_binary {
        config.player_binary = player_binary;
    }

    log::info!(
        "Configuration: bind_port={}, media_root={}, player={}",
        config.bind_port,
        config.media_root.display(),
        config.player_binary.display()
    );
    if !config.media_root.is_dir() {
        log::warn!(
            "Media root {} does not exist; the catalog will be empty",
            config.media_root.display()
        );
    }

    let core_config = config.to_core_config();
    // SIGTERM grace plus time for the kill that follows it.
    let reap_limit = Duration::from_millis(core_config.stop_grace_ms) + Duration::from_secs(1);
    let handle = tokio::runtime::Handle::current();
    let services =
        bootstrap_services(&core_config, handle).context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let app_state = AppState::new(&services, Arc::new(core_config));
    let shutdown = services.cancel_token.clone();
    let mut server_handle = tokio::spawn(start_server(app_state, shutdown));

    tokio::select! {
        _ = shutdown_signal() => {
            log::info!("Shutdown signal received, cleaning up...");
        }
        result = &mut server_handle => {
            services.shutdown();
            services.wait_for_players(reap_limit).await;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("HTTP server failed"),
                Err(e) => Err(e).context("HTTP server task panicked"),
            };
        }
    }

    // Stops the session, closes sockets and lets the server drain.
    services.shutdown();
    services.wait_for_players(reap_limit).await;

    match server_handle.await {
        Ok(Err(e)) => log::error!("Server error: {}", e),
        Err(e) => log::error!("Server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
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
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
