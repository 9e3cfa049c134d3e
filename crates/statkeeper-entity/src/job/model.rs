//! Analysis job entity model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use statkeeper_core::config::WeightConfig;
use statkeeper_core::error::AppError;
use statkeeper_core::result::AppResult;
use statkeeper_core::types::{CandidateSignals, TableIdentity, TimeWindow};

use super::priority::compute_priority_score;
use super::status::JobStatus;

/// Validated staleness signals for one object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobSignals {
    /// Estimated live row count.
    pub row_count: u64,
    /// Rows modified since the last refresh.
    pub modified_rows: u64,
    /// `modified_rows / max(row_count, 1)`.
    pub change_ratio: f64,
    /// Last successful refresh, `None` if never analyzed.
    pub last_refresh: Option<DateTime<Utc>>,
}

impl JobSignals {
    /// Build signals and derive the change ratio.
    pub fn new(row_count: u64, modified_rows: u64, last_refresh: Option<DateTime<Utc>>) -> Self {
        Self {
            row_count,
            modified_rows,
            change_ratio: modified_rows as f64 / row_count.max(1) as f64,
            last_refresh,
        }
    }

    /// Validate a raw provider row.
    pub fn try_from_candidate(candidate: &CandidateSignals) -> AppResult<Self> {
        let row_count = u64::try_from(candidate.row_count).map_err(|_| {
            AppError::validation(format!(
                "Object '{}' reported a negative row count ({})",
                candidate.identity.key(),
                candidate.row_count
            ))
        })?;
        let modified_rows = u64::try_from(candidate.modified_rows).map_err(|_| {
            AppError::validation(format!(
                "Object '{}' reported a negative modified row count ({})",
                candidate.identity.key(),
                candidate.modified_rows
            ))
        })?;
        Ok(Self::new(row_count, modified_rows, candidate.last_refresh))
    }

    /// Whether statistics have never been computed for the object.
    pub fn never_analyzed(&self) -> bool {
        self.last_refresh.is_none()
    }

    /// Time since the last refresh, clamped at zero; `None` if never analyzed.
    pub fn since_last_refresh(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_refresh.map(|at| (now - at).max(Duration::zero()))
    }

    /// Whether the object counts as stale under `auto_analyze_ratio`.
    ///
    /// Never-analyzed objects are always stale; a ratio of zero disables
    /// the threshold.
    pub fn is_stale(&self, auto_analyze_ratio: f64) -> bool {
        self.never_analyzed()
            || auto_analyze_ratio <= 0.0
            || self.change_ratio >= auto_analyze_ratio
    }
}

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Back to `Pending`; reconsidered on the next refresh pass.
    Retry {
        /// Failed attempts so far.
        retry_count: u32,
    },
    /// Excluded from scheduling until `until`.
    Quarantined {
        /// End of the cool-down.
        until: DateTime<Utc>,
    },
}

/// One schedulable object: a table or a single partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    /// Which object this job refreshes.
    identity: TableIdentity,
    /// Cached `identity.key()`.
    key: String,
    /// Current staleness signals.
    signals: JobSignals,
    /// Derived priority score (higher = more urgent).
    priority: f64,
    /// Lifecycle status.
    status: JobStatus,
    /// Failed attempts since the last success or quarantine release.
    retry_count: u32,
    /// End of the current quarantine, if any.
    quarantined_until: Option<DateTime<Utc>>,
    /// Diagnostic from the most recent failure.
    last_error: Option<String>,
    /// When the job was first built.
    created_at: DateTime<Utc>,
    /// When the job last changed.
    updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    /// Build a job from a raw provider row, validating its signals.
    ///
    /// Malformed input yields a `Validation` error; the caller is expected
    /// to skip the object for this cycle and carry on with the rest.
    pub fn from_candidate(
        candidate: &CandidateSignals,
        weights: &WeightConfig,
        now: DateTime<Utc>,
    ) -> AppResult<Self> {
        candidate.identity.validate()?;
        let signals = JobSignals::try_from_candidate(candidate)?;
        Ok(Self::new(candidate.identity.clone(), signals, weights, now))
    }

    /// Build a `Pending` job from already-validated signals.
    pub fn new(
        identity: TableIdentity,
        signals: JobSignals,
        weights: &WeightConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let key = identity.key();
        let priority = compute_priority_score(&signals, weights, now);
        Self {
            identity,
            key,
            signals,
            priority,
            status: JobStatus::Pending,
            retry_count: 0,
            quarantined_until: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Unique scheduling key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The object being refreshed.
    pub fn identity(&self) -> &TableIdentity {
        &self.identity
    }

    /// Current signals.
    pub fn signals(&self) -> &JobSignals {
        &self.signals
    }

    /// Current priority score.
    pub fn priority(&self) -> f64 {
        self.priority
    }

    /// Current status.
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Failed attempts since the last success.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// End of the current quarantine.
    pub fn quarantined_until(&self) -> Option<DateTime<Utc>> {
        self.quarantined_until
    }

    /// Diagnostic from the most recent failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// When the job was first built.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the job last changed.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Replace the signals with a fresh provider snapshot and re-score.
    ///
    /// The later of the two last-refresh times is kept, so a success this
    /// process recorded is not undone by a provider that has not caught up.
    pub fn refresh_signals(
        &mut self,
        signals: JobSignals,
        weights: &WeightConfig,
        now: DateTime<Utc>,
    ) {
        let last_refresh = match (self.signals.last_refresh, signals.last_refresh) {
            (Some(ours), Some(theirs)) => Some(ours.max(theirs)),
            (ours, theirs) => theirs.or(ours),
        };
        self.signals = JobSignals {
            last_refresh,
            ..signals
        };
        self.rescore(weights, now);
    }

    /// Recompute the priority score from the current signals.
    pub fn rescore(&mut self, weights: &WeightConfig, now: DateTime<Utc>) {
        self.priority = compute_priority_score(&self.signals, weights, now);
        self.updated_at = now;
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::scheduling(format!(
                "Illegal status transition for '{}': {} -> {}",
                self.key, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Whether the job may be dispatched at `now`.
    ///
    /// False outside the window, while a previous refresh is younger than
    /// `min_reanalyze_interval`, during an unexpired quarantine, and while
    /// the job is running.
    pub fn is_eligible(
        &self,
        now: DateTime<Utc>,
        window: &TimeWindow,
        min_reanalyze_interval: Duration,
    ) -> bool {
        if !window.contains_instant(now) {
            return false;
        }
        if self.status == JobStatus::Running {
            return false;
        }
        if self.is_quarantined(now) {
            return false;
        }
        match self.signals.since_last_refresh(now) {
            Some(elapsed) => elapsed >= min_reanalyze_interval,
            None => true,
        }
    }

    /// Whether a quarantine is in force at `now`.
    pub fn is_quarantined(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Quarantined
            && self.quarantined_until.is_some_and(|until| now < until)
    }

    /// Record a successful attempt.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> AppResult<()> {
        self.transition(JobStatus::Succeeded, now)?;
        self.retry_count = 0;
        self.last_error = None;
        self.signals = JobSignals::new(self.signals.row_count, 0, Some(now));
        Ok(())
    }

    /// Record a failed attempt and apply the retry/quarantine policy.
    ///
    /// The job goes `Running -> Failed`, then either back to `Pending` or,
    /// once `retry_count` reaches `max_retries` (or immediately for a
    /// permanent failure), on to `Quarantined` until `now + quarantine`.
    pub fn record_failure(
        &mut self,
        now: DateTime<Utc>,
        message: impl Into<String>,
        max_retries: u32,
        quarantine: Duration,
        permanent: bool,
    ) -> AppResult<FailureDisposition> {
        self.transition(JobStatus::Failed, now)?;
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(message.into());

        if permanent || self.retry_count >= max_retries {
            let until = now
                .checked_add_signed(quarantine)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.transition(JobStatus::Quarantined, now)?;
            self.quarantined_until = Some(until);
            return Ok(FailureDisposition::Quarantined { until });
        }

        self.transition(JobStatus::Pending, now)?;
        Ok(FailureDisposition::Retry {
            retry_count: self.retry_count,
        })
    }

    /// Release an expired quarantine. Returns `true` if the job was released.
    pub fn release_quarantine(&mut self, now: DateTime<Utc>) -> AppResult<bool> {
        if self.status != JobStatus::Quarantined || self.is_quarantined(now) {
            return Ok(false);
        }
        self.transition(JobStatus::Pending, now)?;
        self.retry_count = 0;
        self.quarantined_until = None;
        Ok(true)
    }
}
