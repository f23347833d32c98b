//! Serializable results of `status` and `migrate` runs.

use crate::error::{MigrateError, MigrateResult};
use crate::ledger::LedgerEntry;
use crate::planner::{Plan, PlanReason};
use chrono::{DateTime, Utc};
use keel_core::{MigrationId, OrderingKey, TransactionMode};
use serde::Serialize;
use std::time::Duration;

/// What happened to one planned unit during an apply run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitStatus {
    /// Committed and recorded as succeeded
    Applied { duration_ms: u64 },
    /// Its SQL failed; rolled back and recorded as failed
    Failed { error: String },
    /// Ran without error but was undone with a failing later unit
    /// (single-transaction mode only)
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    pub id: MigrationId,
    pub key: OrderingKey,
    #[serde(flatten)]
    pub status: UnitStatus,
}

impl UnitOutcome {
    pub fn applied(id: MigrationId, key: OrderingKey, duration: Duration) -> Self {
        Self {
            id,
            key,
            status: UnitStatus::Applied {
                duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            },
        }
    }

    pub fn failed(id: MigrationId, key: OrderingKey, error: impl Into<String>) -> Self {
        Self {
            id,
            key,
            status: UnitStatus::Failed {
                error: error.into(),
            },
        }
    }

    pub fn rolled_back(id: MigrationId, key: OrderingKey) -> Self {
        Self {
            id,
            key,
            status: UnitStatus::RolledBack,
        }
    }
}

/// Outcome of [`crate::Executor::apply`], in plan order.
///
/// Units after a failure are not attempted and do not appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub mode: TransactionMode,
    pub outcomes: Vec<UnitOutcome>,
}

impl ApplyReport {
    pub fn new(mode: TransactionMode) -> Self {
        Self {
            mode,
            outcomes: Vec::new(),
        }
    }

    /// Number of units that were committed.
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, UnitStatus::Applied { .. }))
            .count()
    }

    /// The unit that failed, if any.
    pub fn failure(&self) -> Option<&UnitOutcome> {
        self.outcomes
            .iter()
            .find(|o| matches!(o.status, UnitStatus::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failure().is_none()
    }

    /// Turn a failed run into [`MigrateError::Execution`].
    pub fn into_result(self) -> MigrateResult<Self> {
        let failed = self.failure().and_then(|o| match &o.status {
            UnitStatus::Failed { error } => Some((o.id.to_string(), error.clone())),
            _ => None,
        });
        match failed {
            Some((id, message)) => Err(MigrateError::Execution { id, message }),
            None => Ok(self),
        }
    }
}

/// State of one migration as seen by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Applied,
    Pending,
    Retry,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub id: MigrationId,
    pub key: OrderingKey,
    pub state: UnitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub checksum: String,
}

/// Read-only view of the plan joined with the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub namespace: String,
    pub entries: Vec<StatusEntry>,
    pub orphaned: Vec<MigrationId>,
}

impl StatusReport {
    pub fn new(namespace: impl Into<String>, plan: &Plan, ledger: &[LedgerEntry]) -> Self {
        let find = |id: &MigrationId| ledger.iter().find(|e| &e.id == id);

        let mut entries: Vec<StatusEntry> = plan
            .up_to_date()
            .iter()
            .map(|unit| StatusEntry {
                id: unit.id.clone(),
                key: unit.key,
                state: UnitState::Applied,
                applied_at: find(&unit.id).map(|e| e.applied_at),
                last_error: None,
                checksum: unit.checksum.clone(),
            })
            .collect();

        entries.extend(plan.steps().iter().map(|step| {
            let previous = find(&step.unit.id);
            StatusEntry {
                id: step.unit.id.clone(),
                key: step.unit.key,
                state: match step.reason {
                    PlanReason::New => UnitState::Pending,
                    PlanReason::Retry => UnitState::Retry,
                },
                applied_at: None,
                last_error: previous.and_then(|e| e.error.clone()),
                checksum: step.unit.checksum.clone(),
            }
        }));
        entries.sort_by_key(|e| e.key);

        Self {
            namespace: namespace.into(),
            entries,
            orphaned: plan.orphaned().to_vec(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state != UnitState::Applied)
            .count()
    }

    pub fn applied_count(&self) -> usize {
        self.entries.len() - self.pending_count()
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending_count() == 0
    }
}

#[cfg(test)]
#[path = "report_test.rs"]
mod tests;
