//! Persistent refresh history.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::history::CompletionRecord;

/// Stores refresh outcomes so last-refresh times survive restarts.
#[async_trait]
pub trait JobHistoryStore: Send + Sync + 'static {
    /// Persist one completed attempt.
    async fn record_completion(&self, record: &CompletionRecord) -> AppResult<()>;
}
