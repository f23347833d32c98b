//! Database capability traits
//!
//! The migration engine depends only on these traits: statement execution,
//! explicit transaction control, and a namespaced advisory lock that
//! excludes other sessions (and other processes) of the same database.

use crate::error::DbResult;
use crate::value::{Row, SqlValue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Statement execution and transaction control
///
/// Transaction calls apply to the session owned by the implementation;
/// statements issued between `begin` and `commit` run inside it.
#[async_trait]
pub trait DatabaseCore: Send + Sync {
    /// Execute a single parameterized statement, returns affected rows
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize>;

    /// Execute one or more statements separated by `;`
    async fn execute_batch(&self, sql: &str) -> DbResult<()>;

    /// Run a parameterized query and collect all rows
    async fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>>;

    /// Check if a table or view exists
    async fn relation_exists(&self, name: &str) -> DbResult<bool>;

    /// Start a transaction on this session
    async fn begin(&self) -> DbResult<()>;

    /// Commit the open transaction
    async fn commit(&self) -> DbResult<()>;

    /// Roll back the open transaction
    async fn rollback(&self) -> DbResult<()>;

    /// Stable identity of the target database (e.g. canonical file path).
    ///
    /// Two handles to the same database return the same identity.
    fn identity(&self) -> &str;

    /// Database type identifier for logging
    fn db_type(&self) -> &'static str;
}

/// Current owner of an advisory lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    /// Opaque holder token passed to `try_advisory_lock`
    pub holder: String,

    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
}

/// Namespaced mutual exclusion scoped to the target database
#[async_trait]
pub trait DatabaseLock: Send + Sync {
    /// Try once to take the lock for `namespace`. Returns `false` if another
    /// holder has it.
    async fn try_advisory_lock(&self, namespace: &str, holder: &str) -> DbResult<bool>;

    /// Release the lock if `holder` owns it. Releasing a lock that is not
    /// held is a no-op.
    async fn release_advisory_lock(&self, namespace: &str, holder: &str) -> DbResult<()>;

    /// Report who holds the lock, if anyone
    async fn advisory_lock_holder(&self, namespace: &str) -> DbResult<Option<LockHolder>>;

    /// Remove a lock taken more than `older_than` ago. Returns `true` if a
    /// lock was removed.
    ///
    /// Backends whose locks die with the owning session have nothing to
    /// break and keep the default.
    async fn break_stale_advisory_lock(
        &self,
        _namespace: &str,
        _older_than: Duration,
    ) -> DbResult<bool> {
        Ok(false)
    }
}

/// Full capability set required by the migration engine
pub trait Database: DatabaseCore + DatabaseLock {}

impl<T: DatabaseCore + DatabaseLock> Database for T {}
