//! KafkasDer Panel Kernel
//!
//! HTTP server for the panel's request-gating pipeline.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use kafkasder_kernel::cli::{Cli, Command, hash_password_from_stdin};
use kafkasder_kernel::{AppState, Config, app};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if let Command::HashPassword { password } = cli.command() {
        println!("{}", hash_password_from_stdin(password)?);
        return Ok(());
    }

    // Initialize tracing
    init_tracing();

    info!("Starting KafkasDer panel kernel");

    // Load configuration from environment
    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        port = config.port,
        environment = ?config.environment,
        "Configuration loaded"
    );

    // Initialize application state (user directory, rate-limit store, etc.)
    let state = AppState::new(&config)
        .await
        .context("failed to initialize application state")?;

    let maintenance = state.spawn_maintenance();

    // Build the router
    let app = app(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    maintenance.shutdown();
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
