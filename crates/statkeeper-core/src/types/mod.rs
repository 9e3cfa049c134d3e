//! Core type definitions used across the statkeeper workspace.

pub mod history;
pub mod identity;
pub mod signals;
pub mod time_window;

pub use history::{CompletionOutcome, CompletionRecord, HistorySource};
pub use identity::TableIdentity;
pub use signals::CandidateSignals;
pub use time_window::TimeWindow;
