//! keel-db - Database capability layer for Keel
//!
//! This crate provides the `Database` traits the migration engine depends on
//! and a DuckDB implementation of them.

pub mod duckdb;
pub mod error;
pub mod traits;
pub mod value;

pub use duckdb::DuckDbBackend;
pub use error::{DbError, DbResult};
pub use traits::{Database, DatabaseCore, DatabaseLock, LockHolder};
pub use value::{Row, SqlValue};
