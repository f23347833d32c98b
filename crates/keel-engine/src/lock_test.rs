use super::*;
use keel_db::{DatabaseCore, DuckDbBackend};

fn settings(timeout_ms: u64) -> LockSettings {
    LockSettings {
        timeout: Duration::from_millis(timeout_ms),
        poll_interval: Duration::from_millis(20),
        stale_after: None,
    }
}

fn sessions() -> (Arc<dyn Database>, Arc<dyn Database>) {
    let a = DuckDbBackend::in_memory().unwrap();
    let b = a.try_clone().unwrap();
    (Arc::new(a), Arc::new(b))
}

#[test]
fn test_namespace_includes_database_identity() {
    let a = DuckDbBackend::in_memory().unwrap();
    let b = DuckDbBackend::in_memory().unwrap();
    let ns_a = namespace_for(&a, "default");
    assert!(ns_a.starts_with(a.identity()));
    assert!(ns_a.ends_with("#default"));
    assert_ne!(ns_a, namespace_for(&b, "default"));
}

#[test]
fn test_holder_tokens_are_unique() {
    let first = holder_token();
    assert!(first.contains(&format!("-pid{}", std::process::id())));
    assert_ne!(first, holder_token());
}

#[test]
fn test_settings_from_config() {
    let config = LockConfig {
        timeout_secs: 3,
        poll_interval_ms: 250,
        stale_after_secs: Some(600),
    };
    let s = LockSettings::from(&config);
    assert_eq!(s.timeout, Duration::from_secs(3));
    assert_eq!(s.poll_interval, Duration::from_millis(250));
    assert_eq!(s.stale_after, Some(Duration::from_secs(600)));
}

#[tokio::test]
async fn test_acquire_and_release() {
    let (a, b) = sessions();
    let ns = namespace_for(a.as_ref(), "default");

    let mut guard = LockCoordinator::new(a.clone(), settings(0))
        .acquire(&ns)
        .await
        .unwrap();
    assert_eq!(guard.namespace(), ns);
    let current = b.advisory_lock_holder(&ns).await.unwrap().unwrap();
    assert_eq!(current.holder, guard.holder());

    guard.release().await.unwrap();
    guard.release().await.unwrap();
    assert!(b.advisory_lock_holder(&ns).await.unwrap().is_none());
}

#[tokio::test]
async fn test_second_session_times_out_naming_holder() {
    let (a, b) = sessions();
    let ns = namespace_for(a.as_ref(), "default");

    let mut guard = LockCoordinator::new(a, settings(0))
        .acquire(&ns)
        .await
        .unwrap();

    let err = LockCoordinator::new(b, settings(60))
        .acquire(&ns)
        .await
        .unwrap_err();
    match err {
        MigrateError::LockTimeout {
            namespace,
            holder,
            waited_ms,
        } => {
            assert_eq!(namespace, ns);
            assert!(holder.contains(guard.holder()));
            assert!(waited_ms >= 60);
        }
        other => panic!("expected LockTimeout, got {other}"),
    }
    guard.release().await.unwrap();
}

#[tokio::test]
async fn test_waiter_acquires_after_holder_releases() {
    let (a, b) = sessions();
    let ns = namespace_for(a.as_ref(), "default");

    let mut guard = LockCoordinator::new(a, settings(0))
        .acquire(&ns)
        .await
        .unwrap();

    let waiter_ns = ns.clone();
    let waiter = tokio::spawn(async move {
        LockCoordinator::new(b, settings(5_000))
            .acquire(&waiter_ns)
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    guard.release().await.unwrap();

    let mut second = waiter.await.unwrap().unwrap();
    assert_ne!(second.holder(), guard.holder());
    second.release().await.unwrap();
}

#[tokio::test]
async fn test_stale_lock_is_taken_over() {
    let (a, b) = sessions();
    let ns = namespace_for(a.as_ref(), "default");

    // A crashed run left its lock behind two hours ago
    assert!(a.try_advisory_lock(&ns, "crashed-pid1").await.unwrap());
    a.execute(
        "UPDATE keel_lock SET acquired_at = CAST(? AS TIMESTAMP) WHERE namespace = ?",
        &[
            (chrono::Utc::now() - chrono::Duration::hours(2)).into(),
            ns.as_str().into(),
        ],
    )
    .await
    .unwrap();

    let mut stale_settings = settings(0);
    stale_settings.stale_after = Some(Duration::from_secs(3600));
    let mut guard = LockCoordinator::new(b.clone(), stale_settings)
        .acquire(&ns)
        .await
        .unwrap();

    let current = b.advisory_lock_holder(&ns).await.unwrap().unwrap();
    assert_eq!(current.holder, guard.holder());
    guard.release().await.unwrap();
}

#[tokio::test]
async fn test_fresh_lock_is_not_treated_as_stale() {
    let (a, b) = sessions();
    let ns = namespace_for(a.as_ref(), "default");
    assert!(a.try_advisory_lock(&ns, "live-pid1").await.unwrap());

    let mut stale_settings = settings(0);
    stale_settings.stale_after = Some(Duration::from_secs(3600));
    let err = LockCoordinator::new(b, stale_settings)
        .acquire(&ns)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::LockTimeout { .. }));
}

#[tokio::test]
async fn test_dropped_guard_is_released_in_background() {
    let (a, b) = sessions();
    let ns = namespace_for(a.as_ref(), "default");

    let guard = LockCoordinator::new(a, settings(0))
        .acquire(&ns)
        .await
        .unwrap();
    drop(guard);

    // Let the spawned release run, then the lock is free again
    let mut guard = LockCoordinator::new(b, settings(2_000))
        .acquire(&ns)
        .await
        .unwrap();
    guard.release().await.unwrap();
}
