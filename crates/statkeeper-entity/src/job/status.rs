//! Job status enumeration and legal transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an analysis job.
///
/// ```text
/// Pending     -> Queued
/// Queued      -> Queued | Pending | Running
/// Running     -> Succeeded | Failed
/// Succeeded   -> Pending | Queued
/// Failed      -> Pending | Quarantined
/// Quarantined -> Pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Known but not currently in the queue.
    Pending,
    /// In the priority queue, waiting for a dispatch slot.
    Queued,
    /// Owned by an in-flight execution.
    Running,
    /// The last attempt completed.
    Succeeded,
    /// The last attempt failed; a retry decision is pending.
    Failed,
    /// Excluded from scheduling until its cool-down expires.
    Quarantined,
}

impl JobStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Queued)
                | (Queued, Pending)
                | (Queued, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Failed, Pending)
                | (Failed, Quarantined)
                | (Succeeded, Pending)
                | (Succeeded, Queued)
                | (Quarantined, Pending)
        )
    }

    /// Whether the job may be pushed into the queue from this status.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Succeeded)
    }

    /// Return the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
