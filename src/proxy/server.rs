//! Gateway server setup and initialization

use anyhow::{Context, Result};
use axum::{routing::any, Router};
use tokio::net::TcpListener;

use crate::config::Config;

use super::{gateway_handler, not_found, GatewayState};

/// Start the gateway server.
///
/// A single catch-all route covers any method on any path matching the
/// config grammar; everything else falls through to the grammar error.
pub async fn start_gateway(
    config: Config,
    state: GatewayState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let bind_addr = config.bind_addr;

    let app = Router::new()
        .route("/*path", any(gateway_handler))
        .fallback(not_found)
        .with_state(state.clone());

    tracing::info!("Starting gateway on {}", bind_addr);

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Gateway listening on {}", bind_addr);

    // Serve until the shutdown signal arrives, then finish in-flight
    // requests before returning
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("Server error")?;

    state.shutdown();
    tracing::info!("Gateway server shut down gracefully");
    Ok(())
}
