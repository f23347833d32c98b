//! End-to-end tests for the migration engine.
//!
//! Each test writes a migrations directory into a temp dir and runs the
//! public `Migrator` API against DuckDB. Separate sessions on one database
//! (`DuckDbBackend::try_clone`) stand in for separate processes.

use async_trait::async_trait;
use keel_core::{CoreError, TransactionMode};
use keel_db::{
    Database, DatabaseCore, DatabaseLock, DbError, DbResult, DuckDbBackend, LockHolder, Row,
    SqlValue,
};
use keel_engine::{
    LockCoordinator, LockSettings, MigrateError, Migrator, MigratorOptions, Outcome, UnitState,
    UnitStatus,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ── Helpers ────────────────────────────────────────────────────────────

fn write(dir: &Path, name: &str, sql: &str) {
    fs::write(dir.join(name), sql).unwrap();
}

fn migrations_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_users.sql", "CREATE TABLE users (id INT);");
    write(dir.path(), "002_orders.sql", "CREATE TABLE orders (id INT);");
    write(
        dir.path(),
        "003_seed.sql",
        "INSERT INTO users VALUES (1); INSERT INTO orders VALUES (10);",
    );
    dir
}

fn options(dir: &Path) -> MigratorOptions {
    let mut options = MigratorOptions::new(dir);
    options.lock = LockSettings {
        timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        stale_after: None,
    };
    options
}

fn memory_db() -> Arc<dyn Database> {
    Arc::new(DuckDbBackend::in_memory().unwrap())
}

async fn ledger_ids(db: &Arc<dyn Database>) -> Vec<(String, String)> {
    db.query(
        "SELECT id, outcome FROM keel_migrations ORDER BY id",
        &[],
    )
    .await
    .unwrap()
    .iter()
    .map(|r| (r.text(0).unwrap(), r.text(1).unwrap()))
    .collect()
}

// ── Ordering and idempotence ───────────────────────────────────────────

#[tokio::test]
async fn migrate_applies_in_ascending_key_order() {
    let dir = TempDir::new().unwrap();
    // Names sort differently from keys; 10 must run after 2
    write(
        dir.path(),
        "10_insert.sql",
        "INSERT INTO log SELECT COUNT(*), 'ten' FROM log;",
    );
    write(
        dir.path(),
        "2_insert.sql",
        "INSERT INTO log SELECT COUNT(*), 'two' FROM log;",
    );
    write(
        dir.path(),
        "1_create.sql",
        "CREATE TABLE log (seq BIGINT, v VARCHAR);",
    );

    let db = memory_db();
    let report = Migrator::new(db.clone(), options(dir.path()))
        .migrate()
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let order: Vec<&str> = report.outcomes.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(order, vec!["1_create", "2_insert", "10_insert"]);

    let rows = db
        .query("SELECT v FROM log ORDER BY seq", &[])
        .await
        .unwrap();
    let values: Vec<String> = rows.iter().map(|r| r.text(0).unwrap()).collect();
    assert_eq!(values, vec!["two", "ten"]);
}

#[tokio::test]
async fn second_migrate_is_a_noop() {
    let dir = migrations_dir();
    let db = memory_db();
    let migrator = Migrator::new(db.clone(), options(dir.path()));

    let first = migrator.migrate().await.unwrap();
    assert_eq!(first.applied_count(), 3);
    let ledger_before = ledger_ids(&db).await;

    let second = migrator.migrate().await.unwrap();
    assert!(second.outcomes.is_empty());
    assert_eq!(ledger_ids(&db).await, ledger_before);

    let rows = db.query("SELECT COUNT(*) FROM users", &[]).await.unwrap();
    assert_eq!(rows[0].int(0).unwrap(), 1);
}

#[tokio::test]
async fn new_migration_is_picked_up_later() {
    let dir = migrations_dir();
    let db = memory_db();
    let migrator = Migrator::new(db.clone(), options(dir.path()));
    migrator.migrate().await.unwrap();

    write(dir.path(), "004_items.sql", "CREATE TABLE items (id INT);");
    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].id, "004_items");
}

// ── Discovery and checksum failures ────────────────────────────────────

#[tokio::test]
async fn duplicate_key_aborts_before_database_contact() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_create_table.sql", "CREATE TABLE a (id INT);");
    write(dir.path(), "001_other.sql", "CREATE TABLE b (id INT);");

    let db = memory_db();
    let err = Migrator::new(db.clone(), options(dir.path()))
        .migrate()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Discovery(CoreError::DuplicateOrderingKey { key: 1, .. })
    ));
    assert!(!db.relation_exists("keel_migrations").await.unwrap());
    assert!(!db.relation_exists("keel_lock").await.unwrap());
}

#[tokio::test]
async fn edited_applied_migration_is_rejected() {
    let dir = migrations_dir();
    let db = memory_db();
    let migrator = Migrator::new(db.clone(), options(dir.path()));
    migrator.migrate().await.unwrap();

    write(dir.path(), "001_users.sql", "CREATE TABLE users (id BIGINT);");
    write(dir.path(), "004_items.sql", "CREATE TABLE items (id INT);");

    let err = migrator.migrate().await.unwrap_err();
    match err {
        MigrateError::ChecksumMismatch { id, .. } => assert_eq!(id, "001_users"),
        other => panic!("expected ChecksumMismatch, got {other}"),
    }
    // Nothing was applied, and the lock was released
    assert!(!db.relation_exists("items").await.unwrap());
    let ns = migrator.lock_namespace();
    assert!(db.advisory_lock_holder(&ns).await.unwrap().is_none());

    let err = migrator.status().await.unwrap_err();
    assert!(matches!(err, MigrateError::ChecksumMismatch { .. }));
}

// ── Failure and retry ──────────────────────────────────────────────────

#[tokio::test]
async fn failed_migration_is_recorded_and_retried_after_fix() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_users.sql", "CREATE TABLE users (id INT);");
    write(dir.path(), "002_orders.sql", "CREATE TABLE orders (id INT);");
    write(dir.path(), "003_bad.sql", "CREATE TABLE broken (id INT;");

    let db = memory_db();
    let migrator = Migrator::new(db.clone(), options(dir.path()));

    let report = migrator.migrate().await.unwrap();
    assert_eq!(report.applied_count(), 2);
    assert_eq!(report.failure().unwrap().id, "003_bad");
    assert!(matches!(
        report.clone().into_result(),
        Err(MigrateError::Execution { ref id, .. }) if id == "003_bad"
    ));
    assert_eq!(
        ledger_ids(&db).await,
        vec![
            ("001_users".to_string(), "succeeded".to_string()),
            ("002_orders".to_string(), "succeeded".to_string()),
            ("003_bad".to_string(), "failed".to_string()),
        ]
    );
    assert!(!db.relation_exists("broken").await.unwrap());

    let status = migrator.status().await.unwrap();
    assert_eq!(status.entries[2].state, UnitState::Retry);
    assert!(status.entries[2].last_error.is_some());

    write(dir.path(), "003_bad.sql", "CREATE TABLE broken (id INT);");
    let report = migrator.migrate().await.unwrap().into_result().unwrap();
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].id, "003_bad");
    assert!(db.relation_exists("broken").await.unwrap());

    let history = migrator.history().await.unwrap();
    assert!(history.iter().all(|e| e.outcome == Outcome::Succeeded));
    assert_eq!(history.len(), 3);
}

#[tokio::test]
async fn single_transaction_mode_is_all_or_nothing() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "001_users.sql", "CREATE TABLE users (id INT);");
    write(dir.path(), "002_bad.sql", "INSERT INTO missing VALUES (1);");

    let db = memory_db();
    let mut opts = options(dir.path());
    opts.transaction = TransactionMode::Single;
    let report = Migrator::new(db.clone(), opts).migrate().await.unwrap();

    assert_eq!(report.outcomes[0].status, UnitStatus::RolledBack);
    assert!(matches!(report.outcomes[1].status, UnitStatus::Failed { .. }));
    assert!(!db.relation_exists("users").await.unwrap());
    assert_eq!(
        ledger_ids(&db).await,
        vec![("002_bad".to_string(), "failed".to_string())]
    );
}

// ── Status ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn status_on_fresh_database_writes_nothing() {
    let dir = migrations_dir();
    let db = memory_db();
    let migrator = Migrator::new(db.clone(), options(dir.path()));

    let status = migrator.status().await.unwrap();
    assert_eq!(status.pending_count(), 3);
    assert!(status
        .entries
        .iter()
        .all(|e| e.state == UnitState::Pending));
    assert!(!db.relation_exists("keel_migrations").await.unwrap());
    assert!(migrator.history().await.unwrap().is_empty());

    migrator.migrate().await.unwrap();
    let status = migrator.status().await.unwrap();
    assert!(status.is_up_to_date());
    assert_eq!(status.applied_count(), 3);
}

// ── Concurrency ────────────────────────────────────────────────────────

#[tokio::test]
async fn run_blocked_by_held_lock_times_out() {
    let dir = migrations_dir();
    let db = DuckDbBackend::in_memory().unwrap();
    let other: Arc<dyn Database> = Arc::new(db.try_clone().unwrap());
    let db: Arc<dyn Database> = Arc::new(db);

    let mut opts = options(dir.path());
    opts.lock.timeout = Duration::from_millis(50);
    let migrator = Migrator::new(db.clone(), opts);

    let mut guard = LockCoordinator::new(other, LockSettings::default())
        .acquire(&migrator.lock_namespace())
        .await
        .unwrap();

    let err = migrator.migrate().await.unwrap_err();
    match err {
        MigrateError::LockTimeout { holder, .. } => assert!(holder.contains(guard.holder())),
        other => panic!("expected LockTimeout, got {other}"),
    }
    assert!(!db.relation_exists("users").await.unwrap());

    guard.release().await.unwrap();
    assert_eq!(migrator.migrate().await.unwrap().applied_count(), 3);
}

#[tokio::test]
async fn different_namespaces_do_not_contend() {
    let dir = migrations_dir();
    let db = DuckDbBackend::in_memory().unwrap();
    let other: Arc<dyn Database> = Arc::new(db.try_clone().unwrap());
    let db: Arc<dyn Database> = Arc::new(db);

    let mut opts = options(dir.path());
    opts.namespace = "tenant_a".to_string();
    opts.lock.timeout = Duration::ZERO;
    let migrator = Migrator::new(db, opts);

    let mut guard = LockCoordinator::new(other.clone(), LockSettings::default())
        .acquire(&keel_engine::namespace_for(other.as_ref(), "tenant_b"))
        .await
        .unwrap();

    assert_eq!(migrator.migrate().await.unwrap().applied_count(), 3);
    guard.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_apply_each_migration_once() {
    let dir = migrations_dir();
    let base = DuckDbBackend::in_memory().unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let db: Arc<dyn Database> = Arc::new(base.try_clone().unwrap());
        let migrator = Migrator::new(db, options(dir.path()));
        handles.push(tokio::spawn(async move { migrator.migrate().await }));
    }

    let mut applied = 0;
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert!(report.is_success());
        applied += report.applied_count();
    }
    assert_eq!(applied, 3);

    let db: Arc<dyn Database> = Arc::new(base);
    let ids = ledger_ids(&db).await;
    assert_eq!(ids.len(), 3);
    let rows = db.query("SELECT COUNT(*) FROM users", &[]).await.unwrap();
    assert_eq!(rows[0].int(0).unwrap(), 1);
}

#[tokio::test]
async fn file_backed_database_keeps_ledger_between_sessions() {
    let dir = migrations_dir();
    let db_dir = TempDir::new().unwrap();
    let path = db_dir.path().join("app.duckdb");

    {
        let db: Arc<dyn Database> = Arc::new(DuckDbBackend::from_path(&path).unwrap());
        let report = Migrator::new(db, options(dir.path())).migrate().await.unwrap();
        assert_eq!(report.applied_count(), 3);
    }

    let db: Arc<dyn Database> = Arc::new(DuckDbBackend::from_path(&path).unwrap());
    let migrator = Migrator::new(db, options(dir.path()));
    assert!(migrator.status().await.unwrap().is_up_to_date());
    assert!(migrator.migrate().await.unwrap().outcomes.is_empty());
}

#[tokio::test]
async fn lock_left_by_ended_session_does_not_block_next_run() {
    let dir = migrations_dir();
    let db_dir = TempDir::new().unwrap();
    let path = db_dir.path().join("app.duckdb");

    {
        let db: Arc<dyn Database> = Arc::new(DuckDbBackend::from_path(&path).unwrap());
        let migrator = Migrator::new(db.clone(), options(dir.path()));
        let guard = LockCoordinator::new(db, LockSettings::default())
            .acquire(&migrator.lock_namespace())
            .await
            .unwrap();
        // The run dies without releasing or dropping its guard
        std::mem::forget(guard);
    }

    let db: Arc<dyn Database> = Arc::new(DuckDbBackend::from_path(&path).unwrap());
    let mut opts = options(dir.path());
    opts.lock.timeout = Duration::from_millis(300);
    let report = Migrator::new(db, opts).migrate().await.unwrap();
    assert_eq!(report.applied_count(), 3);
}

/// DuckDB session whose lock release always fails.
struct FailingRelease(DuckDbBackend);

#[async_trait]
impl DatabaseCore for FailingRelease {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<usize> {
        self.0.execute(sql, params).await
    }

    async fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.0.execute_batch(sql).await
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.0.query(sql, params).await
    }

    async fn relation_exists(&self, name: &str) -> DbResult<bool> {
        self.0.relation_exists(name).await
    }

    async fn begin(&self) -> DbResult<()> {
        self.0.begin().await
    }

    async fn commit(&self) -> DbResult<()> {
        self.0.commit().await
    }

    async fn rollback(&self) -> DbResult<()> {
        self.0.rollback().await
    }

    fn identity(&self) -> &str {
        self.0.identity()
    }

    fn db_type(&self) -> &'static str {
        self.0.db_type()
    }
}

#[async_trait]
impl DatabaseLock for FailingRelease {
    async fn try_advisory_lock(&self, namespace: &str, holder: &str) -> DbResult<bool> {
        self.0.try_advisory_lock(namespace, holder).await
    }

    async fn release_advisory_lock(&self, _namespace: &str, _holder: &str) -> DbResult<()> {
        Err(DbError::ConnectionError("connection reset".to_string()))
    }

    async fn advisory_lock_holder(&self, namespace: &str) -> DbResult<Option<LockHolder>> {
        self.0.advisory_lock_holder(namespace).await
    }
}

#[tokio::test]
async fn failed_lock_release_keeps_apply_report() {
    let dir = migrations_dir();
    write(dir.path(), "004_bad.sql", "INSERT INTO missing VALUES (1);");
    let db: Arc<dyn Database> = Arc::new(FailingRelease(DuckDbBackend::in_memory().unwrap()));

    let report = Migrator::new(db.clone(), options(dir.path()))
        .migrate()
        .await
        .unwrap();
    assert_eq!(report.applied_count(), 3);
    let failed = report.failure().unwrap();
    assert_eq!(failed.id, "004_bad");
    assert!(matches!(failed.status, UnitStatus::Failed { .. }));
    assert_eq!(ledger_ids(&db).await.len(), 4);
}
