//! Refresh history store.

use async_trait::async_trait;
use sqlx::PgConnection;

use statkeeper_core::error::{AppError, ErrorKind};
use statkeeper_core::result::AppResult;
use statkeeper_core::traits::{JobHistoryStore, call_with_session};
use statkeeper_core::types::CompletionRecord;

use crate::pool::PgSessionPool;
use crate::transaction::with_transaction;

/// Persists one `analyze_history` row per finished attempt.
#[derive(Debug, Clone)]
pub struct PgJobHistoryStore {
    sessions: PgSessionPool,
}

impl PgJobHistoryStore {
    /// Create a store drawing sessions from `sessions`.
    pub fn new(sessions: PgSessionPool) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl JobHistoryStore for PgJobHistoryStore {
    async fn record_completion(&self, record: &CompletionRecord) -> AppResult<()> {
        let record = record.clone();
        call_with_session(&self.sessions, move |conn| {
            Box::pin(async move {
                with_transaction(&mut **conn, move |tx| {
                    Box::pin(async move { insert(tx, &record).await })
                })
                .await
            })
        })
        .await
    }
}

async fn insert(conn: &mut PgConnection, record: &CompletionRecord) -> AppResult<()> {
    let attempt = i32::try_from(record.attempt).unwrap_or(i32::MAX);
    let duration_ms = i64::try_from(record.duration_ms).unwrap_or(i64::MAX);

    sqlx::query(
        "INSERT INTO analyze_history \
         (attempt_id, schema_name, table_name, partition_name, finished_at, outcome, \
          attempt, duration_ms, message, source) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         ON CONFLICT (attempt_id) DO NOTHING",
    )
    .bind(record.attempt_id)
    .bind(&record.identity.schema)
    .bind(&record.identity.table)
    .bind(record.identity.partition.as_deref())
    .bind(record.finished_at)
    .bind(record.outcome.as_str())
    .bind(attempt)
    .bind(duration_ms)
    .bind(record.message.as_deref())
    .bind(record.source.as_str())
    .execute(conn)
    .await
    .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to record refresh history", e))?;

    Ok(())
}
