// GuardianBridge - transparent, configurable AI API gateway
//
// Clients address the gateway as if it were an upstream chat-completion
// provider; each request's path carries its own configuration token. Per
// request the gateway runs content moderation (keyword prefilter + trained
// classifier), translates between vendor chat dialects through a neutral
// model, and forwards with streaming-safe error recovery.
//
// Architecture:
// - Proxy (axum): catch-all route, config decoding, per-request dispatch
// - Transform: dialect detection + adapters around the neutral chat model
// - Moderation: two-tier engine backed by per-profile SQLite sample stores
// - Scheduler: periodic classifier retraining over the profiles
// - Memory guard: cache eviction + process RSS watchdog

mod cli;
mod config;
mod error;
mod logging;
mod memory_guard;
mod moderation;
mod proxy;
mod transform;
mod util;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use cli::Cli;
use config::Config;
use memory_guard::MemoryGuard;
use proxy::GatewayState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Utility flags run before any server machinery
    if cli::handle_utility_commands(&args) {
        return Ok(());
    }

    let mut config = Config::load(args.config.as_deref());
    args.apply(&mut config);

    // Keep the file-log guard alive until exit
    let _log_guard = logging::init(&config);

    tracing::info!("GuardianBridge {} starting", config::VERSION);
    tracing::debug!("Profiles dir: {}", config.profiles_dir.display());

    let state = GatewayState::new(config.profiles_dir.clone());

    // Background tasks share one shutdown signal
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let scheduler_handle = if config.scheduler.enabled {
        Some(moderation::smart::scheduler::spawn_scheduler(
            config.profiles_dir.clone(),
            std::time::Duration::from_secs(config.scheduler.check_interval_minutes * 60),
            shutdown_rx.clone(),
        ))
    } else {
        tracing::debug!("Training scheduler disabled");
        None
    };

    let guard_handle = if config.memory_guard {
        let guard = Arc::new(MemoryGuard::new());
        state.register_caches(&guard);
        Some(memory_guard::spawn_guard(guard, shutdown_rx.clone()))
    } else {
        tracing::debug!("Memory guard disabled");
        None
    };

    // The server gets its own oneshot so graceful shutdown drains requests
    let (server_shutdown_tx, server_shutdown_rx) = tokio::sync::oneshot::channel();
    let server_config = config.clone();
    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        proxy::server::start_gateway(server_config, server_state, server_shutdown_rx).await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    // Stop background tasks first, then drain the server
    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler_handle {
        let _ = handle.await;
    }
    if let Some(handle) = guard_handle {
        let _ = handle.await;
    }

    let _ = server_shutdown_tx.send(());
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Server error during shutdown: {:#}", e),
        Err(e) => tracing::error!("Server task failed: {}", e),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
