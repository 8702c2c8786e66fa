//! SmsHook Web Server - signed SMS webhook receiver.
//!
//! This binary:
//! - Receives signed message webhooks and stores them idempotently
//! - Serves message listings and statistics
//! - Exposes liveness and readiness probes
//!
//! Configuration comes from the environment, see [`smshook::Config`].

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use smshook::{router, AppState, Config, MessageStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so LOG_LEVEL can seed the filter
    let config = Config::from_env();

    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    info!(
        port = config.port,
        database_url = %config.database_url,
        webhook_secret_configured = config.has_webhook_secret(),
        "config_loaded"
    );

    if !config.has_webhook_secret() {
        warn!("webhook_secret_not_configured");
    }

    // Open the message store
    let store = MessageStore::connect(&config.database_url)
        .await
        .context("Failed to open message store")?;
    store
        .migrate()
        .await
        .context("Failed to migrate message store")?;

    // Create application state
    let state = AppState::new(config.clone(), store.clone());

    // Build the router
    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Close the pool, waiting for in-flight queries
    store.close().await;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
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
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
