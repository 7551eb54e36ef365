//! Burrow node
//!
//! Serves the frontend RPC for one node. In this build the overlay is the
//! in-memory network and the container runtime is the mock runtime, which is
//! enough to drive the whole pod lifecycle from a local frontend.

use std::sync::Arc;

use anyhow::{Context, Result};
use burrow_node::{
    config::Config, frontend, MemoryNetwork, MemorySubstrate, MockCri, SystemController,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to BURROW_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        node_id = %config.node_id,
        listen_addr = %config.listen_addr,
        "Starting burrow node"
    );

    let network = MemoryNetwork::new();
    let substrate = Arc::new(MemorySubstrate::new(network, config.node_id.to_string()));
    let system = Arc::new(SystemController::new(
        substrate,
        Arc::new(MockCri::new()),
        config.settings.clone(),
    ));

    let app = frontend::create_router(Arc::clone(&system));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening for frontend calls");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await;
    if let Err(e) = &served {
        error!(error = %e, "Server error");
    }

    if let Err(e) = system.disconnect().await {
        error!(error = %e, "Failed to leave the overlay");
    }

    info!("Burrow node shutdown complete");
    served.context("frontend server failed")
}
