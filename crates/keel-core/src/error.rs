//! Error types for keel-core

use thiserror::Error;

/// Core error type for Keel
#[derive(Error, Debug)]
pub enum CoreError {
    /// K001: Configuration file not found
    #[error("[K001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// K002: Failed to parse configuration file
    #[error("[K002] Failed to parse config: {message}")]
    ConfigParseError { message: String },

    /// K003: Invalid configuration value
    #[error("[K003] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// K010: Migrations directory does not exist
    #[error("[K010] Migrations directory not found: {path}")]
    MigrationDirNotFound { path: String },

    /// K011: File name cannot be parsed into an ordering key
    #[error("[K011] Invalid migration file name '{path}': {reason}")]
    InvalidMigrationName { path: String, reason: String },

    /// K012: Two migration files share the same ordering key
    #[error("[K012] Duplicate ordering key {key}: '{first}' and '{second}'")]
    DuplicateOrderingKey {
        key: u64,
        first: String,
        second: String,
    },

    /// K013: Migration file has no executable content
    #[error("[K013] Migration '{path}' has no executable SQL")]
    EmptyMigration { path: String },

    /// K014: IO error with file path context
    #[error("[K014] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },
}

impl CoreError {
    /// True for errors raised while scanning the migration source.
    ///
    /// These abort a run before the database is touched.
    pub fn is_discovery(&self) -> bool {
        matches!(
            self,
            CoreError::MigrationDirNotFound { .. }
                | CoreError::InvalidMigrationName { .. }
                | CoreError::DuplicateOrderingKey { .. }
                | CoreError::EmptyMigration { .. }
                | CoreError::IoWithPath { .. }
        )
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        CoreError::ConfigParseError {
            message: err.to_string(),
        }
    }
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
