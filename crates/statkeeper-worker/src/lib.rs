//! Statistics refresh scheduling for statkeeper.
//!
//! This crate provides:
//! - An indexed max-priority queue with O(log n) update and removal by key
//! - A job executor that runs one refresh attempt and persists its history
//! - The refresher control loop: window gate, signal refresh, bounded
//!   dispatch, and retry/quarantine handling of completions

pub mod executor;
pub mod queue;
pub mod refresher;

pub use executor::{ExecutionOutcome, JobExecutor};
pub use queue::{PriorityQueue, QueueItem};
pub use refresher::{CycleReport, DispatchReport, Refresher, RefresherStats};
