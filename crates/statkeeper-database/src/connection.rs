//! PostgreSQL connection pool management.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use statkeeper_core::config::DatabaseConfig;
use statkeeper_core::error::{AppError, ErrorKind};
use statkeeper_core::result::AppResult;

use crate::pool::PgSessionPool;

/// Wrapper around the sqlx PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// Open a pool sized by `config`.
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        info!(
            url = %mask_password(&config.url),
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Database,
                    format!("Failed to connect to {}: {e}", mask_password(&config.url)),
                    e,
                )
            })?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// The underlying sqlx pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A session pool handing out individual connections from this pool.
    pub fn sessions(&self) -> PgSessionPool {
        PgSessionPool::new(self.pool.clone())
    }

    /// Round-trip a trivial query and report the latency.
    pub async fn health_check(&self) -> AppResult<Duration> {
        let started = Instant::now();
        let value = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Health check failed", e))?;

        if value != 1 {
            return Err(AppError::database(format!(
                "Health check returned unexpected value {value}"
            )));
        }

        let latency = started.elapsed();
        if latency > Duration::from_secs(1) {
            warn!(latency_ms = latency.as_millis() as u64, "Slow database health check");
        }
        Ok(latency)
    }

    /// Close all connections in the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}

/// Replace the password in a connection URL with `****`.
pub fn mask_password(url: &str) -> String {
    let credentials_start = url.find("://").map(|p| p + 3).unwrap_or(0);
    let Some(at) = url[credentials_start..].rfind('@').map(|p| p + credentials_start) else {
        return url.to_string();
    };

    match url[credentials_start..at].find(':') {
        Some(colon) => {
            let colon = colon + credentials_start;
            format!("{}:****{}", &url[..colon], &url[at..])
        }
        None => url.to_string(),
    }
}
