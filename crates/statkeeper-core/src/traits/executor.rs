//! Execution of a single statistics refresh.

use async_trait::async_trait;

use crate::error::AppError;
use crate::types::identity::TableIdentity;

/// Error from a refresh execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Permanent failure; retrying cannot help.
    #[error("Permanent refresh failure: {0}")]
    Permanent(String),

    /// Transient failure, may retry.
    #[error("Transient refresh failure: {0}")]
    Transient(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl ExecutionError {
    /// Whether the retry policy should be skipped.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

/// Runs the refresh operation for one object.
///
/// Must be safe to call concurrently up to the configured concurrency
/// limit. Timeouts and cancellation are the implementation's concern.
#[async_trait]
pub trait AnalyzeExecutor: Send + Sync + 'static {
    /// Refresh statistics for `target`.
    async fn execute(&self, target: &TableIdentity) -> Result<(), ExecutionError>;
}
