//! Database module for uptrail.
//!
//! Provides SQLite storage with an embedded migration, plus the storage
//! traits the monitoring core is written against.

mod check_log;
mod models;
mod store;

pub use check_log::*;
pub use models::*;
pub use store::*;
