//! Source of staleness signals.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::signals::CandidateSignals;

/// Lists the objects whose statistics may need a refresh.
///
/// Each call is treated as an independent snapshot; no consistency is
/// assumed between two calls.
#[async_trait]
pub trait SignalProvider: Send + Sync + 'static {
    /// Return the current stale candidates and their signals.
    async fn list_stale_candidates(&self) -> AppResult<Vec<CandidateSignals>>;
}
