//! Error types for the migration engine.

use keel_core::CoreError;
use keel_db::DbError;
use thiserror::Error;

/// Migration engine errors.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// The migration source is malformed or ambiguous (M001).
    #[error("[M001] Migration discovery failed: {0}")]
    Discovery(#[from] CoreError),

    /// Another run holds the lock for this namespace (M002).
    #[error(
        "[M002] Timed out after {waited_ms} ms waiting for migration lock '{namespace}' (held by {holder})"
    )]
    LockTimeout {
        namespace: String,
        holder: String,
        waited_ms: u64,
    },

    /// An applied migration was edited after it ran (M003).
    #[error(
        "[M003] Checksum mismatch for applied migration '{id}': ledger has {recorded}, file has {current}. \
         Applied migrations must not be edited; add a new migration instead"
    )]
    ChecksumMismatch {
        id: String,
        recorded: String,
        current: String,
    },

    /// A migration's SQL failed and was rolled back (M004).
    #[error("[M004] Migration '{id}' failed: {message}")]
    Execution { id: String, message: String },

    /// Attempt to re-record a migration that already succeeded (M005).
    #[error("[M005] Ledger already records a successful run of '{id}'")]
    LedgerConflict { id: String },

    /// A ledger row could not be interpreted (M006).
    #[error("[M006] Ledger entry '{id}' is unreadable: {message}")]
    LedgerCorrupt { id: String, message: String },

    /// Database failure outside a migration's own SQL (M007).
    #[error("[M007] {0}")]
    Database(#[from] DbError),
}

/// Result type alias for [`MigrateError`].
pub type MigrateResult<T> = Result<T, MigrateError>;
