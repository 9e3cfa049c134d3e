//! Transaction helper.

use futures::future::BoxFuture;
use sqlx::{Connection, PgConnection};
use tracing::warn;

use statkeeper_core::error::{AppError, ErrorKind};
use statkeeper_core::result::AppResult;

/// Run `f` inside a transaction on `conn`.
///
/// Commits when `f` succeeds and rolls back when it fails. A failed
/// rollback is logged; the error from `f` is what the caller sees.
pub async fn with_transaction<T, F>(conn: &mut PgConnection, f: F) -> AppResult<T>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, AppResult<T>>,
{
    let mut tx = conn.begin().await.map_err(|e| {
        AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
    })?;

    match f(&mut *tx).await {
        Ok(value) => {
            tx.commit().await.map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to commit transaction", e)
            })?;
            Ok(value)
        }
        Err(err) => {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "Rollback failed");
            }
            Err(err)
        }
    }
}
