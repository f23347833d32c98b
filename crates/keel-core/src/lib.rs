//! keel-core - Core library for Keel
//!
//! This crate provides the migration unit types, migration discovery from a
//! directory of SQL files, content checksums, and `keel.yml` configuration
//! parsing shared by the engine and the CLI.

pub mod checksum;
pub mod config;
pub mod error;
pub mod migration;
pub mod source;

pub use checksum::{compute_checksum, ChecksumPolicy};
pub use config::{Config, DatabaseConfig, DbType, LockConfig, TransactionMode};
pub use error::{CoreError, CoreResult};
pub use migration::{MigrationId, MigrationUnit, OrderingKey};
pub use source::discover;
