//! Persistent record of which migrations ran against a database.
//!
//! The ledger lives in the target database itself (`keel_migrations`), so it
//! commits and rolls back together with the schema changes it describes.

use crate::error::{MigrateError, MigrateResult};
use chrono::{DateTime, Utc};
use keel_core::{MigrationId, MigrationUnit};
use keel_db::{Database, Row, SqlValue};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Fixed name of the ledger table.
pub const LEDGER_TABLE: &str = "keel_migrations";

/// Result of the last attempt to apply a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    /// Value stored in the `outcome` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "succeeded" => Some(Outcome::Succeeded),
            "failed" => Some(Outcome::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: MigrationId,
    pub applied_at: DateTime<Utc>,
    pub checksum: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl LedgerEntry {
    /// Entry for a unit whose SQL ran to completion.
    pub fn succeeded(unit: &MigrationUnit, duration: Duration) -> Self {
        Self {
            id: unit.id.clone(),
            applied_at: Utc::now(),
            checksum: unit.checksum.clone(),
            outcome: Outcome::Succeeded,
            error: None,
            duration_ms: duration_ms(duration),
        }
    }

    /// Entry for a unit whose SQL failed and was rolled back.
    pub fn failed(unit: &MigrationUnit, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            id: unit.id.clone(),
            applied_at: Utc::now(),
            checksum: unit.checksum.clone(),
            outcome: Outcome::Failed,
            error: Some(error.into()),
            duration_ms: duration_ms(duration),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }

    fn from_row(row: &Row) -> MigrateResult<Self> {
        let id = row.text(0)?;
        let corrupt = |message: String| MigrateError::LedgerCorrupt {
            id: id.clone(),
            message,
        };

        let applied_at = row
            .timestamp(1)
            .map_err(|e| corrupt(format!("applied_at: {e}")))?;
        let outcome_raw = row.text(3)?;
        let outcome = Outcome::parse(&outcome_raw)
            .ok_or_else(|| corrupt(format!("unknown outcome '{outcome_raw}'")))?;
        let duration = row.int(5)?;

        Ok(Self {
            id: MigrationId::new(id.clone()),
            applied_at,
            checksum: row.text(2)?,
            outcome,
            error: row.opt_text(4)?,
            duration_ms: u64::try_from(duration).unwrap_or(0),
        })
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

const SELECT_COLUMNS: &str =
    "id, CAST(applied_at AS VARCHAR), checksum, outcome, error, duration_ms";

/// Reads and writes the ledger table on the caller's session.
///
/// Writes do not open their own transaction; the executor decides whether a
/// record shares a transaction with the migration's SQL.
pub struct Ledger {
    db: Arc<dyn Database>,
}

impl Ledger {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Create the ledger table if it does not exist yet.
    pub async fn ensure_schema(&self) -> MigrateResult<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (
                id          VARCHAR   NOT NULL PRIMARY KEY,
                applied_at  TIMESTAMP NOT NULL,
                checksum    VARCHAR   NOT NULL,
                outcome     VARCHAR   NOT NULL,
                error       VARCHAR,
                duration_ms BIGINT    NOT NULL DEFAULT 0
            )"
        );
        self.db.execute_batch(&ddl).await?;
        Ok(())
    }

    /// Whether the ledger table has been created on this database.
    pub async fn exists(&self) -> MigrateResult<bool> {
        Ok(self.db.relation_exists(LEDGER_TABLE).await?)
    }

    /// All entries, ordered by id.
    pub async fn list_applied(&self) -> MigrateResult<Vec<LedgerEntry>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM {LEDGER_TABLE} ORDER BY id");
        let rows = self.db.query(&sql, &[]).await?;
        rows.iter().map(LedgerEntry::from_row).collect()
    }

    /// Like [`Ledger::list_applied`], but a database that has never been
    /// migrated reads as an empty ledger instead of an error.
    pub async fn list_applied_if_exists(&self) -> MigrateResult<Vec<LedgerEntry>> {
        if !self.exists().await? {
            return Ok(Vec::new());
        }
        self.list_applied().await
    }

    /// Look up a single entry.
    pub async fn get(&self, id: &str) -> MigrateResult<Option<LedgerEntry>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM {LEDGER_TABLE} WHERE id = ?");
        let rows = self.db.query(&sql, &[id.into()]).await?;
        rows.first().map(LedgerEntry::from_row).transpose()
    }

    /// Record the outcome of an attempt.
    ///
    /// A previous failed entry for the same id is overwritten. A previous
    /// successful entry is never touched and yields
    /// [`MigrateError::LedgerConflict`].
    pub async fn record(&self, entry: &LedgerEntry) -> MigrateResult<()> {
        let params: [SqlValue; 6] = [
            entry.applied_at.into(),
            entry.checksum.as_str().into(),
            entry.outcome.as_str().into(),
            entry.error.clone().into(),
            i64::try_from(entry.duration_ms).unwrap_or(i64::MAX).into(),
            entry.id.as_str().into(),
        ];

        match self.get(entry.id.as_str()).await? {
            Some(existing) if existing.is_succeeded() => Err(MigrateError::LedgerConflict {
                id: entry.id.to_string(),
            }),
            Some(_) => {
                let sql = format!(
                    "UPDATE {LEDGER_TABLE}
                     SET applied_at = CAST(? AS TIMESTAMP), checksum = ?, outcome = ?, error = ?, duration_ms = ?
                     WHERE id = ? AND outcome = 'failed'"
                );
                let updated = self.db.execute(&sql, &params).await?;
                if updated == 0 {
                    return Err(MigrateError::LedgerConflict {
                        id: entry.id.to_string(),
                    });
                }
                log::debug!("Updated ledger entry {} -> {}", entry.id, entry.outcome);
                Ok(())
            }
            None => {
                let sql = format!(
                    "INSERT INTO {LEDGER_TABLE} (applied_at, checksum, outcome, error, duration_ms, id)
                     VALUES (CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?)"
                );
                self.db.execute(&sql, &params).await?;
                log::debug!("Recorded ledger entry {} -> {}", entry.id, entry.outcome);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[path = "ledger_test.rs"]
mod tests;
