//! Collaborator adapters backed by PostgreSQL.

pub mod analyze;
pub mod history;
pub mod signals;

pub use analyze::PgAnalyzeExecutor;
pub use history::PgJobHistoryStore;
pub use signals::PgSignalProvider;
