//! # statkeeper-database
//!
//! PostgreSQL connection management and the adapters the refresher talks
//! to: the statistics signal provider, the `ANALYZE` executor, and the
//! refresh history store.

pub mod connection;
pub mod migration;
pub mod pool;
pub mod repositories;
pub mod transaction;

pub use connection::DatabasePool;
pub use pool::PgSessionPool;
pub use repositories::{PgAnalyzeExecutor, PgJobHistoryStore, PgSignalProvider};
