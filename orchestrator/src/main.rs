//! datashell orchestrator: session-oriented data analysis over HTTP and MCP

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use datashell_orchestrator::api::create_router;
use datashell_orchestrator::config::AppConfig;
use datashell_orchestrator::logging::init_logging;
use datashell_orchestrator::service::DataService;
use datashell_orchestrator::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_logging(&config.server)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting datashell orchestrator"
    );
    info!(
        default_timeout_secs = config.execution.default_timeout_secs,
        max_timeout_secs = config.execution.max_timeout_secs,
        auto_import = ?config.sessions.auto_import,
        workspace_dir = ?config.sessions.workspace_dir,
        "Execution settings"
    );
    if config.sessions.workspace_dir.is_none() {
        warn!("No workspace_dir configured; sessions share the process working directory");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;

    // Create shared application state
    let state = Arc::new(AppState::new(DataService::new(config)));
    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Listening on");

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    state.service.shutdown().await;

    info!("datashell orchestrator stopped");
    Ok(())
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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
