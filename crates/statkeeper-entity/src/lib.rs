//! # statkeeper-entity
//!
//! The schedulable unit of statkeeper: one table or partition whose
//! statistics may need a refresh, with its staleness signals, priority
//! score, and lifecycle status.

pub mod job;

pub use job::{AnalysisJob, FailureDisposition, JobSignals, JobStatus};
