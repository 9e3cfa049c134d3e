//! Priority scoring.
//!
//! The score is a weighted sum of three normalized terms:
//!
//! | term | value |
//! |------|-------|
//! | change | `change_ratio` |
//! | size | `log10(row_count + 1) / 10` |
//! | staleness | `h / (h + 24)` where `h` is hours since the last refresh |
//!
//! Each term is non-decreasing in its signal, so with non-negative weights
//! the score is too. The size term grows logarithmically so large tables
//! do not crowd out small ones.

use chrono::{DateTime, Utc};

use statkeeper_core::config::WeightConfig;

use super::model::JobSignals;

/// Score of an object that has never been analyzed.
pub const NEVER_ANALYZED_PRIORITY: f64 = f64::MAX;

/// Staleness reaches half its maximum after this many hours.
const STALENESS_HALF_LIFE_HOURS: f64 = 24.0;

/// `log10` of the row count at which the size term reaches 1.
const SIZE_NORMALIZER: f64 = 10.0;

/// Compute the priority score for `signals` at `now`.
pub fn compute_priority_score(
    signals: &JobSignals,
    weights: &WeightConfig,
    now: DateTime<Utc>,
) -> f64 {
    let Some(elapsed) = signals.since_last_refresh(now) else {
        return NEVER_ANALYZED_PRIORITY;
    };

    let change = signals.change_ratio;
    let size = (signals.row_count as f64 + 1.0).log10() / SIZE_NORMALIZER;
    let hours = elapsed.num_seconds().max(0) as f64 / 3600.0;
    let staleness = hours / (hours + STALENESS_HALF_LIFE_HOURS);

    weights.change_ratio * change + weights.size * size + weights.staleness * staleness
}
