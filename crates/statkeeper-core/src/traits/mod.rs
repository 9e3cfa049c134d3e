//! Collaborator traits defined in `statkeeper-core` and implemented by
//! adapter crates.

pub mod executor;
pub mod history;
pub mod session_pool;
pub mod signal_provider;

pub use executor::{AnalyzeExecutor, ExecutionError};
pub use history::JobHistoryStore;
pub use session_pool::{SessionPool, call_with_session};
pub use signal_provider::SignalProvider;
