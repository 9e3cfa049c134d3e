//! Statkeeper: background statistics refresh for PostgreSQL.
//!
//! Main entry point that wires the crates together and runs the refresher
//! until the process is told to stop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing;
use tracing_subscriber::{EnvFilter, fmt};

use statkeeper_core::config::{AppConfig, RefresherConfig};
use statkeeper_core::error::AppError;
use statkeeper_database::{DatabasePool, PgAnalyzeExecutor, PgJobHistoryStore, PgSignalProvider};
use statkeeper_worker::Refresher;

#[tokio::main]
async fn main() {
    let env = std::env::var("STATKEEPER_ENV").unwrap_or_else(|_| "development".to_string());

    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(env = %env, "Configuration loaded");

    if let Err(e) = run(config, env).await {
        tracing::error!(error = %e, "Statkeeper exited with an error");
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

async fn run(config: AppConfig, env: String) -> Result<(), AppError> {
    tracing::info!("Starting statkeeper v{}", env!("CARGO_PKG_VERSION"));

    let db = DatabasePool::connect(&config.database).await?;
    let latency = db.health_check().await?;
    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
    tracing::info!(latency_ms, "Database reachable");

    statkeeper_database::migration::run_migrations(db.pool()).await?;

    let sessions = db.sessions();
    let provider = Arc::new(PgSignalProvider::new(sessions.clone()));
    let analyzer = Arc::new(PgAnalyzeExecutor::new(sessions.clone()));
    let history = Arc::new(PgJobHistoryStore::new(sessions));

    let (config_tx, config_rx) = watch::channel(config.refresher.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresher = Refresher::new(provider, analyzer, history, config_rx)?;
    let refresher_handle = tokio::spawn(refresher.run(shutdown_rx));
    let reload_handle = tokio::spawn(reload_on_hangup(env, config_tx));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping refresher...");
    let _ = shutdown_tx.send(true);
    reload_handle.abort();

    match refresher_handle.await {
        Ok(stats) => tracing::info!(
            succeeded = stats.succeeded,
            failed = stats.failed_total,
            quarantined = stats.quarantined,
            "Refresher stopped"
        ),
        Err(e) => tracing::error!(error = %e, "Refresher task failed"),
    }

    db.close().await;
    tracing::info!("Statkeeper shut down gracefully");
    Ok(())
}

/// Re-read the configuration on SIGHUP and hand the refresher section to
/// the running refresher, which applies it at its next cycle.
#[cfg(unix)]
async fn reload_on_hangup(env: String, config_tx: watch::Sender<RefresherConfig>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGHUP handler, live reload disabled");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        match AppConfig::load(&env) {
            Ok(config) => {
                tracing::info!("Reloaded configuration");
                if config_tx.send(config.refresher).is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Configuration reload failed, keeping current"),
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_env: String, _config_tx: watch::Sender<RefresherConfig>) {
    std::future::pending::<()>().await;
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
