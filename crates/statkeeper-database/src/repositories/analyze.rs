//! `ANALYZE` executor.

use async_trait::async_trait;

use statkeeper_core::traits::{AnalyzeExecutor, ExecutionError, call_with_session};
use statkeeper_core::types::TableIdentity;

use crate::pool::PgSessionPool;

/// SQLSTATEs for which retrying the same statement cannot succeed.
const PERMANENT_SQLSTATES: &[&str] = &[
    "42P01", // undefined_table
    "3F000", // invalid_schema_name
    "42501", // insufficient_privilege
    "42602", // invalid_name
];

/// Refreshes statistics by running `ANALYZE` on the target relation.
#[derive(Debug, Clone)]
pub struct PgAnalyzeExecutor {
    sessions: PgSessionPool,
}

impl PgAnalyzeExecutor {
    /// Create an executor drawing sessions from `sessions`.
    pub fn new(sessions: PgSessionPool) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl AnalyzeExecutor for PgAnalyzeExecutor {
    async fn execute(&self, target: &TableIdentity) -> Result<(), ExecutionError> {
        let statement = analyze_statement(target);
        tracing::debug!(statement = %statement, "Running ANALYZE");

        call_with_session(&self.sessions, move |conn| {
            Box::pin(async move {
                sqlx::query(&statement)
                    .persistent(false)
                    .execute(&mut **conn)
                    .await
                    .map(|_| ())
                    .map_err(classify)
            })
        })
        .await
    }
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The `ANALYZE` statement for `target`: the partition when there is one,
/// otherwise the table.
pub fn analyze_statement(target: &TableIdentity) -> String {
    format!(
        "ANALYZE {}.{}",
        quote_ident(&target.schema),
        quote_ident(target.target_relation())
    )
}

fn classify(err: sqlx::Error) -> ExecutionError {
    let code = match &err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    };
    classify_code(code.as_deref(), err.to_string())
}

fn classify_code(code: Option<&str>, message: String) -> ExecutionError {
    match code {
        Some(code) if PERMANENT_SQLSTATES.contains(&code) => ExecutionError::Permanent(message),
        _ => ExecutionError::Transient(message),
    }
}
