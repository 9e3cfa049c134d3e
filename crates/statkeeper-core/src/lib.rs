//! # statkeeper-core
//!
//! Core crate for statkeeper. Contains configuration schemas, the
//! maintenance time window, object identities and staleness signals,
//! the collaborator traits implemented by adapter crates, and the
//! unified error system.
//!
//! This crate has **no** internal dependencies on other statkeeper crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
