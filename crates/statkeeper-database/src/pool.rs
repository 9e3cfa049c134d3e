//! Session pool over individual PostgreSQL connections.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgPool, Postgres};
use tracing::{debug, warn};

use statkeeper_core::error::{AppError, ErrorKind};
use statkeeper_core::result::AppResult;
use statkeeper_core::traits::SessionPool;

/// Hands out pooled connections.
///
/// A connection put back is recycled by sqlx; a destroyed one is detached
/// from the pool and closed, so a session left mid-statement or
/// mid-transaction is never reused.
#[derive(Debug, Clone)]
pub struct PgSessionPool {
    pool: PgPool,
}

impl PgSessionPool {
    /// Wrap an existing sqlx pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionPool for PgSessionPool {
    type Session = PoolConnection<Postgres>;

    async fn get(&self) -> AppResult<Self::Session> {
        self.pool.acquire().await.map_err(|e| {
            AppError::with_source(
                ErrorKind::ServiceUnavailable,
                "Failed to acquire a database session",
                e,
            )
        })
    }

    fn put(&self, session: Self::Session) {
        drop(session);
    }

    fn destroy(&self, session: Self::Session) {
        let connection = session.detach();
        debug!("Closing detached database session");
        tokio::spawn(async move {
            if let Err(e) = connection.close().await {
                warn!(error = %e, "Failed to close detached database session");
            }
        });
    }
}
