//! keel-engine - Migration engine for Keel
//!
//! Tracks applied migrations in a ledger table inside the target database,
//! serializes concurrent runs with a database-scoped lock, plans pending
//! migrations and applies them transactionally.

pub mod error;
pub mod executor;
pub mod ledger;
pub mod lock;
pub mod migrator;
pub mod planner;
pub mod report;

pub use error::{MigrateError, MigrateResult};
pub use executor::Executor;
pub use ledger::{Ledger, LedgerEntry, Outcome, LEDGER_TABLE};
pub use lock::{namespace_for, LockCoordinator, LockGuard, LockSettings};
pub use migrator::{Migrator, MigratorOptions};
pub use planner::{plan, Plan, PlanReason, PlannedUnit};
pub use report::{ApplyReport, StatusEntry, StatusReport, UnitOutcome, UnitState, UnitStatus};
