//! Database-scoped mutual exclusion for apply runs.
//!
//! Two runs that target the same database and namespace always contend for
//! the same lock, whichever process or host they come from. Runs against
//! different databases never contend.

use crate::error::{MigrateError, MigrateResult};
use keel_core::LockConfig;
use keel_db::Database;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Timing knobs for [`LockCoordinator::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Give up after waiting this long. Zero means a single attempt.
    pub timeout: Duration,

    /// Pause between attempts.
    pub poll_interval: Duration,

    /// Break locks older than this. `None` never breaks a lock.
    pub stale_after: Option<Duration>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self::from(&LockConfig::default())
    }
}

impl From<&LockConfig> for LockSettings {
    fn from(config: &LockConfig) -> Self {
        Self {
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            stale_after: config.stale_after(),
        }
    }
}

/// Lock namespace for a logical migration stream on `db`.
pub fn namespace_for(db: &dyn Database, name: &str) -> String {
    format!("{}#{}", db.identity(), name)
}

/// Token identifying this process as a lock holder.
fn holder_token() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-pid{}", &uuid[..12], std::process::id())
}

/// Acquires the advisory lock for a namespace.
pub struct LockCoordinator {
    db: Arc<dyn Database>,
    settings: LockSettings,
}

impl LockCoordinator {
    pub fn new(db: Arc<dyn Database>, settings: LockSettings) -> Self {
        Self { db, settings }
    }

    /// Block until the lock for `namespace` is ours or the timeout elapses.
    pub async fn acquire(&self, namespace: &str) -> MigrateResult<LockGuard> {
        let holder = holder_token();
        let started = Instant::now();
        let mut announced = false;

        loop {
            if self.db.try_advisory_lock(namespace, &holder).await? {
                log::debug!("Acquired migration lock {namespace} as {holder}");
                return Ok(LockGuard {
                    db: self.db.clone(),
                    namespace: namespace.to_string(),
                    holder,
                    released: false,
                });
            }

            if let Some(stale_after) = self.settings.stale_after {
                if self
                    .db
                    .break_stale_advisory_lock(namespace, stale_after)
                    .await?
                {
                    log::warn!(
                        "Broke stale migration lock {namespace} (held longer than {}s)",
                        stale_after.as_secs()
                    );
                    continue;
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= self.settings.timeout {
                let holder = match self.db.advisory_lock_holder(namespace).await? {
                    Some(current) => format!(
                        "{} since {}",
                        current.holder,
                        current.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
                    ),
                    None => "unknown holder".to_string(),
                };
                return Err(MigrateError::LockTimeout {
                    namespace: namespace.to_string(),
                    holder,
                    waited_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
            }

            if !announced {
                log::info!("Waiting for migration lock {namespace}");
                announced = true;
            }
            let remaining = self.settings.timeout - elapsed;
            sleep(self.settings.poll_interval.min(remaining)).await;
        }
    }
}

/// Proof of lock ownership.
///
/// Call [`LockGuard::release`] when done. A guard dropped while still held
/// schedules a best-effort release on the current runtime.
pub struct LockGuard {
    db: Arc<dyn Database>,
    namespace: String,
    holder: String,
    released: bool,
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("namespace", &self.namespace)
            .field("holder", &self.holder)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl LockGuard {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Release the lock. Calling this again is a no-op.
    pub async fn release(&mut self) -> MigrateResult<()> {
        if self.released {
            return Ok(());
        }
        self.db
            .release_advisory_lock(&self.namespace, &self.holder)
            .await?;
        self.released = true;
        log::debug!("Released migration lock {}", self.namespace);
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        log::warn!(
            "Migration lock {} dropped without release; releasing in background",
            self.namespace
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let db = self.db.clone();
                let namespace = std::mem::take(&mut self.namespace);
                let holder = std::mem::take(&mut self.holder);
                handle.spawn(async move {
                    if let Err(e) = db.release_advisory_lock(&namespace, &holder).await {
                        log::warn!("Background release of {namespace} failed: {e}");
                    }
                });
            }
            Err(_) => log::warn!(
                "No async runtime to release migration lock {}; it stays held until broken",
                self.namespace
            ),
        }
    }
}

#[cfg(test)]
#[path = "lock_test.rs"]
mod tests;
