//! Persistent job-history records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::identity::TableIdentity;

/// Final outcome of one refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionOutcome {
    /// The refresh completed.
    Succeeded,
    /// The refresh failed and will be retried.
    Failed,
    /// The refresh failed and the object was quarantined.
    Quarantined,
}

impl CompletionOutcome {
    /// Return the outcome as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for CompletionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What produced a statistics change recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistorySource {
    /// A scheduled or manual analyze.
    #[serde(rename = "analyze")]
    Analyze,
    /// Statistics imported from a dump.
    #[serde(rename = "load stats")]
    LoadStats,
    /// In-memory deltas flushed to storage.
    #[serde(rename = "flush stats")]
    FlushStats,
    /// A DDL change that reset statistics.
    #[serde(rename = "schema change")]
    SchemaChange,
}

impl HistorySource {
    /// Stable string stored in the history table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::LoadStats => "load stats",
            Self::FlushStats => "flush stats",
            Self::SchemaChange => "schema change",
        }
    }
}

impl fmt::Display for HistorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of refresh history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Identifier of the dispatch attempt.
    pub attempt_id: Uuid,
    /// The refreshed object.
    pub identity: TableIdentity,
    /// When the attempt finished.
    pub finished_at: DateTime<Utc>,
    /// How the attempt ended.
    pub outcome: CompletionOutcome,
    /// 1-based attempt number since the last success.
    pub attempt: u32,
    /// Wall-clock execution time.
    pub duration_ms: u64,
    /// Diagnostic text from the executor, if any.
    pub message: Option<String>,
    /// What produced the record.
    pub source: HistorySource,
}
