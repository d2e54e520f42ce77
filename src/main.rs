//! Docconvert Server
//!
//! Document conversion gateway around a headless LibreOffice.
//!
//! The process exits with status 127 after quarantining itself and must be
//! run under a supervisor that restarts it.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docconvert_server::config::Config;
use docconvert_server::quarantine::QUARANTINE_EXIT_CODE;
use docconvert_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "docconvert_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Docconvert Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Converter: {}", config.converter.engine_path);
    tracing::info!("Work directory: {}", config.converter.work_dir.display());

    let state = AppState::new(config.clone()).context("Failed to initialize application state")?;

    if !state.invoker().engine().is_available().await {
        tracing::warn!(
            "{} is not available; conversions will fail and quarantine the service",
            state.invoker().engine().name()
        );
    }

    let app = docconvert_server::app(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;
    tracing::info!("Docconvert Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let grace = Duration::from_millis(config.server.quarantine_grace_ms);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone(), grace))
        .await
        .context("Server error")?;

    if state.lifecycle().is_quarantined() {
        let record = state.lifecycle().record();
        tracing::error!(
            reason = record.reason.as_deref().unwrap_or("unknown"),
            "Exiting quarantined process"
        );
        std::process::exit(QUARANTINE_EXIT_CODE);
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown on Ctrl+C, SIGTERM, or a quarantine exit request
async fn shutdown_signal(state: AppState, grace: Duration) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
        _ = state.lifecycle().exit_requested() => {
            tracing::warn!("Quarantined, draining connections before exit...");

            // Open keep-alive or stalled connections must not keep a bad process alive
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                tracing::error!("Grace period elapsed, forcing exit");
                std::process::exit(QUARANTINE_EXIT_CODE);
            });
        },
    }
}
