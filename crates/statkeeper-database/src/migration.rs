//! Schema migrations for the refresh history table.

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tracing::info;

use statkeeper_core::error::{AppError, ErrorKind};
use statkeeper_core::result::AppResult;

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Apply every pending migration.
pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    let latest = MIGRATOR.iter().map(|m| m.version).max();
    info!(
        migrations = MIGRATOR.iter().count(),
        latest = ?latest,
        "Applying schema migrations"
    );

    MIGRATOR.run(pool).await.map_err(|e| {
        AppError::with_source(
            ErrorKind::Database,
            format!("Schema migration failed: {e}"),
            e,
        )
    })?;

    info!("Schema is up to date");
    Ok(())
}
