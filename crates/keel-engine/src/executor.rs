//! Transactional application of a plan.
//!
//! The caller must hold the migration lock for the duration of
//! [`Executor::apply`].

use crate::error::MigrateResult;
use crate::ledger::{Ledger, LedgerEntry};
use crate::planner::{Plan, PlannedUnit};
use crate::report::{ApplyReport, UnitOutcome};
use keel_core::{MigrationUnit, TransactionMode};
use keel_db::Database;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Executor {
    db: Arc<dyn Database>,
    ledger: Ledger,
    mode: TransactionMode,
}

impl Executor {
    pub fn new(db: Arc<dyn Database>, ledger: Ledger, mode: TransactionMode) -> Self {
        Self { db, ledger, mode }
    }

    /// Apply every planned unit in order, stopping at the first failure.
    ///
    /// A migration whose SQL fails is reported in the returned
    /// [`ApplyReport`]. Failures of the ledger or of transaction control are
    /// returned as errors.
    pub async fn apply(&self, plan: &Plan) -> MigrateResult<ApplyReport> {
        if plan.is_empty() {
            return Ok(ApplyReport::new(self.mode));
        }
        match self.mode {
            TransactionMode::PerMigration => self.apply_per_migration(plan.steps()).await,
            TransactionMode::Single => self.apply_single(plan.steps()).await,
        }
    }

    async fn apply_per_migration(&self, steps: &[PlannedUnit]) -> MigrateResult<ApplyReport> {
        let mut report = ApplyReport::new(TransactionMode::PerMigration);

        for step in steps {
            let unit = &step.unit;
            log::info!("Applying {} ({:?})", unit.label(), step.reason);
            let started = Instant::now();

            self.db.begin().await?;
            let result = match self.db.execute_batch(&unit.sql).await {
                Ok(()) => {
                    let entry = LedgerEntry::succeeded(unit, started.elapsed());
                    if let Err(e) = self.ledger.record(&entry).await {
                        self.rollback_quietly().await;
                        return Err(e);
                    }
                    // A failed commit leaves nothing behind, so it counts
                    // against the unit like a failed statement.
                    self.db
                        .commit()
                        .await
                        .map_err(|e| format!("commit failed: {e}"))
                }
                Err(e) => Err(e.to_string()),
            };

            let elapsed = started.elapsed();
            match result {
                Ok(()) => {
                    log::info!("Applied {} in {} ms", unit.label(), elapsed.as_millis());
                    report
                        .outcomes
                        .push(UnitOutcome::applied(unit.id.clone(), unit.key, elapsed));
                }
                Err(message) => {
                    self.rollback_quietly().await;
                    self.record_failure(unit, &message, elapsed).await?;
                    report
                        .outcomes
                        .push(UnitOutcome::failed(unit.id.clone(), unit.key, message));
                    return Ok(report);
                }
            }
        }
        Ok(report)
    }

    async fn apply_single(&self, steps: &[PlannedUnit]) -> MigrateResult<ApplyReport> {
        let mut report = ApplyReport::new(TransactionMode::Single);
        let mut done: Vec<(&MigrationUnit, Duration)> = Vec::with_capacity(steps.len());

        self.db.begin().await?;
        for step in steps {
            let unit = &step.unit;
            log::info!("Applying {} ({:?})", unit.label(), step.reason);
            let started = Instant::now();

            if let Err(e) = self.db.execute_batch(&unit.sql).await {
                let elapsed = started.elapsed();
                let message = e.to_string();
                self.rollback_quietly().await;
                log::warn!(
                    "Rolled back {} earlier migration(s) in this transaction",
                    done.len()
                );
                self.record_failure(unit, &message, elapsed).await?;

                report.outcomes.extend(
                    done.iter()
                        .map(|(u, _)| UnitOutcome::rolled_back(u.id.clone(), u.key)),
                );
                report
                    .outcomes
                    .push(UnitOutcome::failed(unit.id.clone(), unit.key, message));
                return Ok(report);
            }

            let elapsed = started.elapsed();
            if let Err(e) = self
                .ledger
                .record(&LedgerEntry::succeeded(unit, elapsed))
                .await
            {
                self.rollback_quietly().await;
                return Err(e);
            }
            done.push((unit, elapsed));
        }

        if let Err(e) = self.db.commit().await {
            self.rollback_quietly().await;
            return Err(e.into());
        }

        for (unit, elapsed) in done {
            log::info!("Applied {} in {} ms", unit.label(), elapsed.as_millis());
            report
                .outcomes
                .push(UnitOutcome::applied(unit.id.clone(), unit.key, elapsed));
        }
        Ok(report)
    }

    /// Write the failed entry in its own transaction.
    async fn record_failure(
        &self,
        unit: &MigrationUnit,
        message: &str,
        elapsed: Duration,
    ) -> MigrateResult<()> {
        log::error!("Migration {} failed: {message}", unit.label());
        self.db.begin().await?;
        let entry = LedgerEntry::failed(unit, message, elapsed);
        if let Err(e) = self.ledger.record(&entry).await {
            self.rollback_quietly().await;
            return Err(e);
        }
        self.db.commit().await?;
        Ok(())
    }

    async fn rollback_quietly(&self) {
        if let Err(e) = self.db.rollback().await {
            log::debug!("Rollback after failure: {e}");
        }
    }
}

#[cfg(test)]
#[path = "executor_test.rs"]
mod tests;
