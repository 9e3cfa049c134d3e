//! Analysis job domain entities.

pub mod model;
pub mod priority;
pub mod status;

pub use model::{AnalysisJob, FailureDisposition, JobSignals};
pub use priority::{NEVER_ANALYZED_PRIORITY, compute_priority_score};
pub use status::JobStatus;
