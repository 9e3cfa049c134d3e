//! Job executor: runs one refresh attempt and persists its history row.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing;
use uuid::Uuid;

use statkeeper_core::traits::{AnalyzeExecutor, ExecutionError, JobHistoryStore};
use statkeeper_core::types::{CompletionRecord, TableIdentity};

/// Result of one refresh attempt, handed back to the refresher.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Identifier of the dispatch attempt.
    pub attempt_id: Uuid,
    /// The refreshed object.
    pub identity: TableIdentity,
    /// When the attempt finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock execution time.
    pub duration_ms: u64,
    /// What the analyzer reported.
    pub result: Result<(), ExecutionError>,
}

/// Wraps the analyzer and the history store behind one cloneable handle
/// that can be moved into spawned tasks.
#[derive(Clone)]
pub struct JobExecutor {
    analyzer: Arc<dyn AnalyzeExecutor>,
    history: Arc<dyn JobHistoryStore>,
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor").finish()
    }
}

impl JobExecutor {
    /// Create a new job executor
    pub fn new(analyzer: Arc<dyn AnalyzeExecutor>, history: Arc<dyn JobHistoryStore>) -> Self {
        Self { analyzer, history }
    }

    /// Run one attempt against `identity` and time it.
    pub async fn execute(&self, attempt_id: Uuid, identity: TableIdentity) -> ExecutionOutcome {
        let started = Instant::now();
        tracing::debug!(
            attempt_id = %attempt_id,
            key = %identity.key(),
            "Executing statistics refresh"
        );

        let result = self.analyzer.execute(&identity).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        ExecutionOutcome {
            attempt_id,
            identity,
            finished_at: Utc::now(),
            duration_ms,
            result,
        }
    }

    /// Persist a completion record.
    ///
    /// A failed write is logged and reported as `false`; it never changes
    /// the outcome of the attempt it describes.
    pub async fn record(&self, record: &CompletionRecord) -> bool {
        match self.history.record_completion(record).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    attempt_id = %record.attempt_id,
                    key = %record.identity.key(),
                    outcome = %record.outcome,
                    error = %e,
                    "Failed to record refresh history"
                );
                false
            }
        }
    }
}
