//! DuckDB database backend implementation

use crate::error::{DbError, DbResult};
use crate::traits::{DatabaseCore, DatabaseLock, LockHolder};
use crate::value::{format_timestamp, Row, SqlValue};
use async_trait::async_trait;
use chrono::Utc;
use duckdb::types::Value;
use duckdb::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Table backing the advisory lock emulation.
///
/// DuckDB has no session-scoped advisory locks, so a lock is a row keyed by
/// namespace. The session that inserted a row deletes it when dropped, and
/// opening a database file clears rows whose sessions died without that
/// chance.
pub const LOCK_TABLE: &str = "keel_lock";

/// DuckDB database backend
///
/// One backend is one session. Use [`DuckDbBackend::try_clone`] to open a
/// second session on the same database.
pub struct DuckDbBackend {
    conn: Mutex<Connection>,
    identity: String,
    /// `(namespace, holder)` pairs locked through this session
    held_locks: Mutex<Vec<(String, String)>>,
}

impl DuckDbBackend {
    /// Create a new in-memory DuckDB connection
    pub fn in_memory() -> DbResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self::with_connection(
            conn,
            format!("duckdb::memory:{}", uuid::Uuid::new_v4()),
        ))
    }

    /// Create a new DuckDB connection from a file path
    pub fn from_path(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| DbError::ConnectionError(format!("{e}: {}", path.display())))?;
        // The file exists once opened, so canonicalization only fails on
        // exotic filesystems; fall back to the path as given.
        let canonical = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let backend = Self::with_connection(conn, format!("duckdb:{}", canonical.display()));
        backend.clear_orphaned_locks()?;
        Ok(backend)
    }

    /// Create from path string (handles :memory: special case)
    pub fn new(path: &str) -> DbResult<Self> {
        if path == ":memory:" {
            Self::in_memory()
        } else {
            Self::from_path(Path::new(path))
        }
    }

    /// Open another session on the same database.
    pub fn try_clone(&self) -> DbResult<Self> {
        let conn = self
            .lock_conn()?
            .try_clone()
            .map_err(|e| DbError::ConnectionError(e.to_string()))?;
        Ok(Self::with_connection(conn, self.identity.clone()))
    }

    fn with_connection(conn: Connection, identity: String) -> Self {
        Self {
            conn: Mutex::new(conn),
            identity,
            held_locks: Mutex::new(Vec::new()),
        }
    }

    fn lock_conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))
    }

    /// Execute SQL synchronously
    fn execute_sync(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        log::debug!("Executing: {sql}");
        let conn = self.lock_conn()?;
        let values: Vec<Value> = params.iter().map(to_duckdb_value).collect();
        conn.execute(sql, duckdb::params_from_iter(values))
            .map_err(DbError::from)
    }

    /// Execute batch SQL synchronously
    fn execute_batch_sync(&self, sql: &str) -> DbResult<()> {
        log::debug!("Executing batch ({} bytes)", sql.len());
        let conn = self.lock_conn()?;
        conn.execute_batch(sql).map_err(DbError::from)
    }

    /// Query rows synchronously
    fn query_sync(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        log::debug!("Executing query: {sql}");
        let conn = self.lock_conn()?;
        let values: Vec<Value> = params.iter().map(to_duckdb_value).collect();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(duckdb::params_from_iter(values))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let column_count = row.as_ref().column_count();
            let mut cols = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value: Value = row.get(idx)?;
                cols.push(from_duckdb_value(value)?);
            }
            out.push(Row(cols));
        }
        Ok(out)
    }

    /// Check if relation exists synchronously
    fn relation_exists_sync(&self, name: &str) -> DbResult<bool> {
        let (schema, table) = match name.rfind('.') {
            Some(pos) => (&name[..pos], &name[pos + 1..]),
            None => ("main", name),
        };
        let rows = self.query_sync(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
            &[schema.into(), table.into()],
        )?;
        let count = rows.first().map(|r| r.int(0)).transpose()?.unwrap_or(0);
        Ok(count > 0)
    }

    /// Run transaction control, mapping failures to `TransactionError`.
    fn transaction_sync(&self, statement: &str) -> DbResult<()> {
        log::debug!("{statement}");
        let conn = self.lock_conn()?;
        conn.execute_batch(statement)
            .map_err(|e| DbError::TransactionError(format!("{statement} failed: {e}")))
    }

    /// Create the lock table if missing.
    ///
    /// Two sessions racing on the first run can both attempt the CREATE; the
    /// loser sees a catalog conflict, which is fine as long as the table now
    /// exists.
    fn ensure_lock_table(&self) -> DbResult<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {LOCK_TABLE} (
                namespace   VARCHAR   NOT NULL PRIMARY KEY,
                holder      VARCHAR   NOT NULL,
                acquired_at TIMESTAMP NOT NULL
            )"
        );
        match self.execute_batch_sync(&ddl) {
            Ok(()) => Ok(()),
            Err(e) => match self.relation_exists_sync(LOCK_TABLE) {
                Ok(true) => {
                    log::debug!("Lock table created concurrently: {e}");
                    Ok(())
                }
                Ok(false) => Err(e),
                Err(read_err) => {
                    log::warn!("Could not check for {LOCK_TABLE} after failed create: {read_err}");
                    Err(e)
                }
            },
        }
    }

    /// Delete lock rows whose sessions are gone.
    ///
    /// Called right after opening a database file. DuckDB's file lock keeps
    /// other processes out, and sessions sharing this process come from
    /// [`DuckDbBackend::try_clone`], so every row already present belongs to
    /// a session that ended without releasing.
    fn clear_orphaned_locks(&self) -> DbResult<()> {
        if !self.relation_exists_sync(LOCK_TABLE)? {
            return Ok(());
        }
        let rows = self.query_sync(&format!("SELECT namespace, holder FROM {LOCK_TABLE}"), &[])?;
        if rows.is_empty() {
            return Ok(());
        }
        for row in &rows {
            log::warn!(
                "Clearing migration lock {} left by ended session {}",
                row.text(0)?,
                row.text(1)?
            );
        }
        self.execute_sync(&format!("DELETE FROM {LOCK_TABLE}"), &[])?;
        Ok(())
    }

    fn held_locks(&self) -> DbResult<MutexGuard<'_, Vec<(String, String)>>> {
        self.held_locks
            .lock()
            .map_err(|e| DbError::MutexPoisoned(e.to_string()))
    }
}

impl Drop for DuckDbBackend {
    /// Release locks this session still holds, so they end with it.
    fn drop(&mut self) {
        let held = std::mem::take(
            self.held_locks
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if held.is_empty() {
            return;
        }
        let conn = self.conn.get_mut().unwrap_or_else(PoisonError::into_inner);
        // An open transaction would discard the deletes when the session closes
        if conn.execute_batch("ROLLBACK").is_ok() {
            log::debug!("Rolled back open transaction of closing session");
        }
        let sql = format!("DELETE FROM {LOCK_TABLE} WHERE namespace = ? AND holder = ?");
        for (namespace, holder) in held {
            log::warn!("Session closed while holding migration lock {namespace}; releasing it");
            if let Err(e) = conn.execute(&sql, duckdb::params![namespace, holder]) {
                log::warn!("Failed to release migration lock {namespace} on close: {e}");
            }
        }
    }
}

fn to_duckdb_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Boolean(*b),
        SqlValue::Int(i) => Value::BigInt(*i),
        SqlValue::Text(s) => Value::Text(s.clone()),
        SqlValue::Timestamp(ts) => Value::Text(format_timestamp(ts)),
    }
}

fn from_duckdb_value(value: Value) -> DbResult<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Boolean(b) => SqlValue::Bool(b),
        Value::TinyInt(i) => SqlValue::Int(i64::from(i)),
        Value::SmallInt(i) => SqlValue::Int(i64::from(i)),
        Value::Int(i) => SqlValue::Int(i64::from(i)),
        Value::BigInt(i) => SqlValue::Int(i),
        Value::UTinyInt(i) => SqlValue::Int(i64::from(i)),
        Value::USmallInt(i) => SqlValue::Int(i64::from(i)),
        Value::UInt(i) => SqlValue::Int(i64::from(i)),
        Value::UBigInt(i) => SqlValue::Int(
            i64::try_from(i).map_err(|_| DbError::DecodeError(format!("{i} overflows i64")))?,
        ),
        Value::HugeInt(i) => SqlValue::Int(
            i64::try_from(i).map_err(|_| DbError::DecodeError(format!("{i} overflows i64")))?,
        ),
        Value::Text(s) => SqlValue::Text(s),
        other => {
            return Err(DbError::DecodeError(format!(
                "unsupported column type {other:?}; cast it to VARCHAR"
            )))
        }
    })
}

#[async_trait]
impl DatabaseCore for DuckDbBackend {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        self.execute_sync(sql, params)
    }

    async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.execute_batch_sync(sql)
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.query_sync(sql, params)
    }

    async fn relation_exists(&self, name: &str) -> DbResult<bool> {
        self.relation_exists_sync(name)
    }

    async fn begin(&self) -> DbResult<()> {
        self.transaction_sync("BEGIN TRANSACTION")
    }

    async fn commit(&self) -> DbResult<()> {
        self.transaction_sync("COMMIT")
    }

    async fn rollback(&self) -> DbResult<()> {
        self.transaction_sync("ROLLBACK")
    }

    fn identity(&self) -> &str {
        &self.identity
    }

    fn db_type(&self) -> &'static str {
        "duckdb"
    }
}

#[async_trait]
impl DatabaseLock for DuckDbBackend {
    async fn try_advisory_lock(&self, namespace: &str, holder: &str) -> DbResult<bool> {
        self.ensure_lock_table()?;
        let sql = format!(
            "INSERT INTO {LOCK_TABLE} (namespace, holder, acquired_at) VALUES (?, ?, CAST(? AS TIMESTAMP))"
        );
        match self.execute_sync(&sql, &[namespace.into(), holder.into(), Utc::now().into()]) {
            Ok(_) => {
                self.held_locks()?
                    .push((namespace.to_string(), holder.to_string()));
                Ok(true)
            }
            Err(e) if e.is_contention() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn release_advisory_lock(&self, namespace: &str, holder: &str) -> DbResult<()> {
        if !self.relation_exists_sync(LOCK_TABLE)? {
            return Ok(());
        }
        let sql = format!("DELETE FROM {LOCK_TABLE} WHERE namespace = ? AND holder = ?");
        self.execute_sync(&sql, &[namespace.into(), holder.into()])?;
        self.held_locks()?
            .retain(|(ns, h)| !(ns == namespace && h == holder));
        Ok(())
    }

    async fn advisory_lock_holder(&self, namespace: &str) -> DbResult<Option<LockHolder>> {
        if !self.relation_exists_sync(LOCK_TABLE)? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT holder, CAST(acquired_at AS VARCHAR) FROM {LOCK_TABLE} WHERE namespace = ?"
        );
        let rows = self.query_sync(&sql, &[namespace.into()])?;
        rows.first()
            .map(|row| {
                Ok(LockHolder {
                    holder: row.text(0)?,
                    acquired_at: row.timestamp(1)?,
                })
            })
            .transpose()
    }

    async fn break_stale_advisory_lock(
        &self,
        namespace: &str,
        older_than: Duration,
    ) -> DbResult<bool> {
        if !self.relation_exists_sync(LOCK_TABLE)? {
            return Ok(false);
        }
        let older_than = chrono::Duration::from_std(older_than)
            .map_err(|e| DbError::ExecutionError(format!("invalid stale threshold: {e}")))?;
        let cutoff = Utc::now() - older_than;
        let sql = format!(
            "DELETE FROM {LOCK_TABLE} WHERE namespace = ? AND acquired_at < CAST(? AS TIMESTAMP)"
        );
        let removed = self.execute_sync(&sql, &[namespace.into(), cutoff.into()])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
