//! Sluice - Main application entry point
//!
//! Starts the HTTP server with all rate limiting tiers wired.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;

use sluice::config::validation::Validate;
use sluice::{AppConfig, create_app, init_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run_server().await
}

/// Run the HTTP server
async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        // Only warn if it's not a "file not found" error
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        std::io::Error::other(format!(
            "Failed to load configuration. Check SLUICE__* env vars: {}",
            e
        ))
    })?;

    config
        .validate()
        .map_err(|e| std::io::Error::other(format!("Configuration validation failed: {}", e)))?;

    // Initialize tracing (after config is loaded so we can use logging config)
    init_tracing(&config.logging)?;

    tracing::info!("Starting sluice server...");
    tracing::info!(
        "Configuration loaded: server={}:{}, backend={:?}",
        config.server.host,
        config.server.port,
        config.rate_limit.backend
    );

    let server_host = config.server.host.clone();
    let server_port = config.server.port;
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_seconds);

    let app_handle = create_app(config).await;

    // Create server address
    let addr = SocketAddr::new(server_host.parse()?, server_port);
    tracing::info!("Server listening on {}", addr);

    // Serve with connect info so the limiter can fall back to the transport
    // peer address when no proxy headers are present
    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app_handle
            .router
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(app_handle.shutdown_token, shutdown_timeout))
    .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Handle graceful shutdown signals and cancel background tasks
async fn shutdown_signal(shutdown_token: CancellationToken, timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }

    // Cancel background tasks and give them time to finish
    tracing::info!("Cancelling background tasks...");
    shutdown_token.cancel();
    tokio::time::sleep(timeout).await;
}
