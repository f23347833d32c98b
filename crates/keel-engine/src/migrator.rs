//! Entry points tying source, ledger, lock, planner and executor together.

use crate::error::MigrateResult;
use crate::executor::Executor;
use crate::ledger::{Ledger, LedgerEntry};
use crate::lock::{namespace_for, LockCoordinator, LockSettings};
use crate::planner::{plan, Plan};
use crate::report::{ApplyReport, StatusReport};
use keel_core::{ChecksumPolicy, Config, CoreResult, MigrationUnit, TransactionMode};
use keel_db::Database;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a [`Migrator`] needs besides the database.
#[derive(Debug, Clone)]
pub struct MigratorOptions {
    pub migrations_dir: PathBuf,
    pub namespace: String,
    pub lock: LockSettings,
    pub transaction: TransactionMode,
    pub checksum: ChecksumPolicy,
}

impl MigratorOptions {
    /// Options with defaults for everything but the migrations directory.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            namespace: "default".to_string(),
            lock: LockSettings::default(),
            transaction: TransactionMode::default(),
            checksum: ChecksumPolicy::default(),
        }
    }

    /// Resolve options from a loaded `keel.yml` rooted at `project_dir`.
    pub fn from_config(
        config: &Config,
        project_dir: &Path,
        target: Option<&str>,
    ) -> CoreResult<Self> {
        Ok(Self {
            migrations_dir: config.migrations_dir_absolute(project_dir),
            namespace: config.get_namespace(target)?.to_string(),
            lock: LockSettings::from(&config.lock),
            transaction: config.transaction,
            checksum: config.checksum,
        })
    }
}

/// Runs `status` and `migrate` against one database.
pub struct Migrator {
    db: Arc<dyn Database>,
    options: MigratorOptions,
}

impl Migrator {
    pub fn new(db: Arc<dyn Database>, options: MigratorOptions) -> Self {
        Self { db, options }
    }

    pub fn options(&self) -> &MigratorOptions {
        &self.options
    }

    /// Lock namespace used by [`Migrator::migrate`].
    pub fn lock_namespace(&self) -> String {
        namespace_for(self.db.as_ref(), &self.options.namespace)
    }

    /// Scan the migrations directory.
    pub fn discover(&self) -> MigrateResult<Vec<MigrationUnit>> {
        Ok(keel_core::discover(
            &self.options.migrations_dir,
            self.options.checksum,
        )?)
    }

    /// Compute the plan without taking the lock or writing anything.
    ///
    /// A database that was never migrated reports every unit as pending.
    pub async fn status(&self) -> MigrateResult<StatusReport> {
        let units = self.discover()?;
        let applied = Ledger::new(self.db.clone())
            .list_applied_if_exists()
            .await?;
        let plan = plan(units, &applied)?;
        Ok(StatusReport::new(&self.options.namespace, &plan, &applied))
    }

    /// Ledger contents, oldest id first. Empty if never migrated.
    pub async fn history(&self) -> MigrateResult<Vec<LedgerEntry>> {
        Ledger::new(self.db.clone()).list_applied_if_exists().await
    }

    /// Apply all pending migrations under the namespace lock.
    ///
    /// Returns `Ok` with a failed [`ApplyReport`] when a migration's SQL
    /// fails; use [`ApplyReport::into_result`] to treat that as an error.
    /// A lock release failure after the run is logged, not returned.
    pub async fn migrate(&self) -> MigrateResult<ApplyReport> {
        // Discovery errors abort before touching the database
        let units = self.discover()?;

        let namespace = self.lock_namespace();
        let coordinator = LockCoordinator::new(self.db.clone(), self.options.lock);
        let mut guard = coordinator.acquire(&namespace).await?;

        let result = self.migrate_locked(units).await;
        let released = guard.release().await;

        // Release errors are logged; the run's own result is returned
        if let Err(release_err) = released {
            log::warn!("Failed to release migration lock {namespace}: {release_err}");
        }
        result
    }

    async fn migrate_locked(&self, units: Vec<MigrationUnit>) -> MigrateResult<ApplyReport> {
        let ledger = Ledger::new(self.db.clone());
        ledger.ensure_schema().await?;

        // Re-read under the lock so a run that finished while we waited is seen
        let applied = ledger.list_applied().await?;
        let plan: Plan = plan(units, &applied)?;

        if plan.is_empty() {
            log::info!(
                "Database is up to date ({} migration(s) applied)",
                plan.up_to_date().len()
            );
        } else {
            log::info!(
                "{} migration(s) to apply in {} mode",
                plan.len(),
                self.options.transaction
            );
        }

        Executor::new(self.db.clone(), ledger, self.options.transaction)
            .apply(&plan)
            .await
    }
}
