//! Decide which migrations still need to run.

use crate::error::{MigrateError, MigrateResult};
use crate::ledger::{LedgerEntry, Outcome};
use keel_core::{MigrationId, MigrationUnit};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Why a unit is in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanReason {
    /// Never attempted on this database
    New,
    /// A previous attempt failed and was rolled back
    Retry,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedUnit {
    pub unit: MigrationUnit,
    pub reason: PlanReason,
}

/// Ordered list of units to apply, plus what was skipped.
///
/// Every planned unit lacks a successful ledger entry, and steps are sorted
/// by ordering key ascending.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    steps: Vec<PlannedUnit>,
    up_to_date: Vec<MigrationUnit>,
    orphaned: Vec<MigrationId>,
}

impl Plan {
    pub fn steps(&self) -> &[PlannedUnit] {
        &self.steps
    }

    /// Units already applied with matching content.
    pub fn up_to_date(&self) -> &[MigrationUnit] {
        &self.up_to_date
    }

    /// Ledger ids with no migration file on disk.
    pub fn orphaned(&self) -> &[MigrationId] {
        &self.orphaned
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

/// Compare discovered units against the ledger.
///
/// `units` must already be sorted by ordering key, as returned by
/// `keel_core::discover`. Fails on the first successfully applied unit whose
/// content changed since it ran.
pub fn plan(units: Vec<MigrationUnit>, applied: &[LedgerEntry]) -> MigrateResult<Plan> {
    let by_id: HashMap<&str, &LedgerEntry> =
        applied.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut out = Plan::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(units.len());

    for unit in units {
        seen.insert(unit.id.to_string());
        match by_id.get(unit.id.as_str()) {
            None => out.steps.push(PlannedUnit {
                unit,
                reason: PlanReason::New,
            }),
            Some(entry) if entry.outcome == Outcome::Failed => {
                if entry.checksum != unit.checksum {
                    log::debug!("{} changed since its failed attempt", unit.id);
                }
                out.steps.push(PlannedUnit {
                    unit,
                    reason: PlanReason::Retry,
                });
            }
            Some(entry) if entry.checksum != unit.checksum => {
                return Err(MigrateError::ChecksumMismatch {
                    id: unit.id.to_string(),
                    recorded: entry.checksum.clone(),
                    current: unit.checksum,
                });
            }
            Some(_) => out.up_to_date.push(unit),
        }
    }

    for entry in applied {
        if !seen.contains(entry.id.as_str()) {
            log::warn!(
                "Ledger entry {} has no migration file; it was renamed or deleted",
                entry.id
            );
            out.orphaned.push(entry.id.clone());
        }
    }

    out.steps.sort_by_key(|step| step.unit.key);
    Ok(out)
}

#[cfg(test)]
#[path = "planner_test.rs"]
mod tests;
