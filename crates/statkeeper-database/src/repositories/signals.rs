//! Staleness signals read from the PostgreSQL statistics collector.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use statkeeper_core::error::{AppError, ErrorKind};
use statkeeper_core::result::AppResult;
use statkeeper_core::traits::{SignalProvider, call_with_session};
use statkeeper_core::types::{CandidateSignals, TableIdentity};

use crate::pool::PgSessionPool;

/// One row per user table or partition with pending modifications or no
/// statistics at all. A partition is reported under its parent's name,
/// and the last refresh is the latest of the collector's analyze times
/// and our own successful history rows.
const STALE_CANDIDATES_SQL: &str = r#"
SELECT s.schemaname::text                                        AS schema_name,
       COALESCE(parent.relname, s.relname)::text                 AS table_name,
       CASE WHEN parent.relname IS NULL THEN NULL
            ELSE s.relname::text END                             AS partition_name,
       s.n_live_tup                                              AS row_count,
       s.n_mod_since_analyze                                     AS modified_rows,
       GREATEST(s.last_analyze, s.last_autoanalyze, h.finished_at) AS last_refresh
FROM pg_stat_user_tables s
LEFT JOIN pg_inherits i ON i.inhrelid = s.relid
LEFT JOIN pg_class parent ON parent.oid = i.inhparent
LEFT JOIN LATERAL (
    SELECT MAX(ah.finished_at) AS finished_at
    FROM analyze_history ah
    WHERE ah.outcome = 'succeeded'
      AND ah.schema_name = s.schemaname
      AND ah.table_name = COALESCE(parent.relname, s.relname)
      AND ah.partition_name IS NOT DISTINCT FROM
          (CASE WHEN parent.relname IS NULL THEN NULL ELSE s.relname END)
) h ON TRUE
WHERE s.relname <> 'analyze_history'
  AND (s.n_mod_since_analyze > 0
       OR (s.last_analyze IS NULL AND s.last_autoanalyze IS NULL AND h.finished_at IS NULL))
"#;

#[derive(Debug, sqlx::FromRow)]
struct CandidateRow {
    schema_name: String,
    table_name: String,
    partition_name: Option<String>,
    row_count: i64,
    modified_rows: i64,
    last_refresh: Option<DateTime<Utc>>,
}

impl From<CandidateRow> for CandidateSignals {
    fn from(row: CandidateRow) -> Self {
        let identity = match row.partition_name {
            Some(partition) => TableIdentity::partition(row.schema_name, row.table_name, partition),
            None => TableIdentity::table(row.schema_name, row.table_name),
        };
        CandidateSignals::new(identity, row.row_count, row.modified_rows, row.last_refresh)
    }
}

/// Lists stale candidates from `pg_stat_user_tables`.
#[derive(Debug, Clone)]
pub struct PgSignalProvider {
    sessions: PgSessionPool,
}

impl PgSignalProvider {
    /// Create a provider drawing sessions from `sessions`.
    pub fn new(sessions: PgSessionPool) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl SignalProvider for PgSignalProvider {
    async fn list_stale_candidates(&self) -> AppResult<Vec<CandidateSignals>> {
        let rows: Vec<CandidateRow> = call_with_session(&self.sessions, |conn| {
            Box::pin(async move {
                sqlx::query_as::<_, CandidateRow>(STALE_CANDIDATES_SQL)
                    .fetch_all(&mut **conn)
                    .await
                    .map_err(|e| {
                        AppError::with_source(
                            ErrorKind::Database,
                            "Failed to list stale candidates",
                            e,
                        )
                    })
            })
        })
        .await?;

        tracing::debug!(candidates = rows.len(), "Fetched staleness signals");
        Ok(rows.into_iter().map(CandidateSignals::from).collect())
    }
}
