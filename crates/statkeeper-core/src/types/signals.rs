//! Raw staleness signals as reported by the statistics layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::TableIdentity;

/// One stale-candidate row from a [`SignalProvider`](crate::traits::SignalProvider).
///
/// Counts are signed because they come straight from the statistics
/// storage; a negative value is malformed input and is rejected when a
/// job is built from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSignals {
    /// Which object the signals describe.
    pub identity: TableIdentity,
    /// Estimated live row count.
    pub row_count: i64,
    /// Rows inserted, updated, or deleted since the last refresh.
    pub modified_rows: i64,
    /// Time of the last successful refresh, `None` if never analyzed.
    pub last_refresh: Option<DateTime<Utc>>,
}

impl CandidateSignals {
    /// Build a candidate row.
    pub fn new(
        identity: TableIdentity,
        row_count: i64,
        modified_rows: i64,
        last_refresh: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            identity,
            row_count,
            modified_rows,
            last_refresh,
        }
    }
}
