//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use keel_core::Config;
use keel_db::{Database, DbError, DuckDbBackend};
use keel_engine::{LockSettings, MigrateError, Migrator, MigratorOptions};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cli::GlobalArgs;

/// Error type representing a non-zero process exit code.
///
/// Use `return Err(ExitCode(N).into())` instead of `std::process::exit(N)`
/// so that RAII destructors run and cleanup happens properly.
#[derive(Debug)]
pub(crate) struct ExitCode(pub(crate) i32);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Control flow only; the message was already printed.
        write!(f, "")
    }
}

impl std::error::Error for ExitCode {}

/// A migration's SQL failed.
pub(crate) const EXIT_MIGRATION_FAILED: i32 = 2;
/// Another run held the lock past the timeout.
pub(crate) const EXIT_LOCK_TIMEOUT: i32 = 3;
/// An applied migration was edited.
pub(crate) const EXIT_CHECKSUM_MISMATCH: i32 = 4;

/// Exit code for an engine error.
pub(crate) fn exit_code_for(err: &MigrateError) -> i32 {
    match err {
        MigrateError::Execution { .. } => EXIT_MIGRATION_FAILED,
        MigrateError::LockTimeout { .. } => EXIT_LOCK_TIMEOUT,
        MigrateError::ChecksumMismatch { .. } => EXIT_CHECKSUM_MISMATCH,
        _ => 1,
    }
}

/// Print an engine error and convert it into the matching [`ExitCode`].
pub(crate) fn fail(err: MigrateError) -> anyhow::Error {
    eprintln!("Error: {err}");
    ExitCode(exit_code_for(&err)).into()
}

/// Load `keel.yml` from `--config` or the project directory.
///
/// Returns the config and the project directory paths are resolved against.
pub(crate) fn load_config(global: &GlobalArgs) -> Result<(Config, PathBuf)> {
    let project_dir = PathBuf::from(&global.project_dir);
    let config = match &global.config {
        Some(path) => Config::load(Path::new(path)),
        None => Config::load_from_dir(&project_dir),
    }
    .context("Failed to load configuration")?;
    Ok((config, project_dir))
}

/// Database path after applying `--database` and the selected target.
pub(crate) fn resolve_database_path(
    config: &Config,
    global: &GlobalArgs,
    project_dir: &Path,
) -> Result<String> {
    let target = Config::resolve_target(global.target.as_deref());
    let path = match &global.database {
        Some(path) => path.clone(),
        None => {
            config
                .get_database_config(target.as_deref())
                .context("Failed to get database configuration")?
                .path
        }
    };
    if path == ":memory:" || Path::new(&path).is_absolute() {
        return Ok(path);
    }
    Ok(project_dir.join(path).display().to_string())
}

/// DuckDB refuses a second process on a database file another process
/// has open for writing.
fn is_file_lock_error(err: &DbError) -> bool {
    matches!(err, DbError::ConnectionError(msg) if msg.contains("Could not set lock"))
}

/// Open the configured database.
///
/// While another process has the file open, keep retrying for up to
/// `settings.timeout`, the same budget the migration lock gets.
pub(crate) async fn create_database_connection(
    config: &Config,
    global: &GlobalArgs,
    project_dir: &Path,
    settings: &LockSettings,
) -> Result<Arc<dyn Database>> {
    let path = resolve_database_path(config, global, project_dir)?;
    log::debug!("Opening database {path}");

    let started = Instant::now();
    loop {
        match DuckDbBackend::new(&path) {
            Ok(db) => return Ok(Arc::new(db)),
            Err(e) if is_file_lock_error(&e) => {
                let elapsed = started.elapsed();
                if elapsed >= settings.timeout {
                    eprintln!(
                        "Error: timed out after {} ms waiting for {path}, which another process has open: {e}",
                        elapsed.as_millis()
                    );
                    return Err(ExitCode(EXIT_LOCK_TIMEOUT).into());
                }
                log::info!("Database {path} is in use by another process, waiting");
                tokio::time::sleep(settings.poll_interval.min(settings.timeout - elapsed)).await;
            }
            Err(e) => return Err(e).context("Failed to connect to database"),
        }
    }
}

/// Build a [`Migrator`] from global args, with an optional lock timeout
/// override in seconds.
pub(crate) async fn build_migrator(
    global: &GlobalArgs,
    lock_timeout: Option<u64>,
) -> Result<Migrator> {
    let (config, project_dir) = load_config(global)?;
    let target = Config::resolve_target(global.target.as_deref());
    let mut options = MigratorOptions::from_config(&config, &project_dir, target.as_deref())
        .context("Invalid target")?;
    if let Some(secs) = lock_timeout {
        options.lock.timeout = Duration::from_secs(secs);
    }
    let db = create_database_connection(&config, global, &project_dir, &options.lock).await?;
    Ok(Migrator::new(db, options))
}

/// Pretty-print `data` as JSON on stdout.
pub(crate) fn print_json<T: Serialize + ?Sized>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}

/// Calculate column widths for a table given headers and row data.
pub(crate) fn calculate_column_widths(headers: &[&str], rows: &[Vec<String>]) -> Vec<usize> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }
    widths
}

/// Print a left-aligned table with a dashed separator under the header.
pub(crate) fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let widths = calculate_column_widths(headers, rows);
    let line = |cells: Vec<String>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{:<width$}", cell, width = w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", line(headers.iter().map(|h| h.to_string()).collect()));
    println!("{}", line(widths.iter().map(|&w| "-".repeat(w)).collect()));
    for row in rows {
        println!("{}", line(row.clone()));
    }
}

/// Shorten a checksum for table output.
pub(crate) fn short_checksum(checksum: &str) -> &str {
    checksum.get(..12).unwrap_or(checksum)
}

/// Keep table cells on one line.
pub(crate) fn single_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}

#[cfg(test)]
#[path = "common_test.rs"]
mod tests;
