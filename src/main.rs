mod config;
mod engine;
mod model;
mod persist;
mod platform;
mod plugin;
mod providers;
mod registry;
mod stores;

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::engine::Engine;
use crate::registry::PluginRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stashbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Chat: {}", config.telegram.chat_id);
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);
    info!("  Command: {}", config.engine.command);

    let registry = PluginRegistry::from_config(&config)?;
    let options = registry.into_engine_options(config.engine.command.clone(), CancellationToken::new())?;

    let engine = Engine::new(options).await;
    engine.start().await?;
    info!("Bot is running, press Ctrl-C or send SIGTERM to stop");

    shutdown_signal().await;

    if let Err(e) = engine.save_config().await {
        error!("Failed to save config: {:#}", e);
    }
    engine.stop().await?;

    Ok(())
}

#[derive(Debug, PartialEq)]
enum Shutdown {
    CtrlC,
    Terminate,
}

/// Wait for Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    match first_shutdown(ctrl_c, terminate).await {
        Shutdown::CtrlC => info!("Received Ctrl+C, shutting down..."),
        Shutdown::Terminate => info!("Received SIGTERM, shutting down..."),
    }
}

async fn first_shutdown(
    ctrl_c: impl Future<Output = ()>,
    terminate: impl Future<Output = ()>,
) -> Shutdown {
    tokio::select! {
        _ = ctrl_c => Shutdown::CtrlC,
        _ = terminate => Shutdown::Terminate,
    }
}
