//! New command implementation - creates the next numbered migration file

use anyhow::{Context, Result};
use keel_core::source::next_key;
use std::fs;

use crate::cli::{GlobalArgs, NewArgs};
use crate::commands::common::load_config;

/// Migration names become part of the file name and the ledger id.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        anyhow::bail!(
            "Invalid migration name '{name}': use lowercase letters, digits and underscores"
        );
    }
    Ok(())
}

/// Execute the new command
pub(crate) async fn execute(args: &NewArgs, global: &GlobalArgs) -> Result<()> {
    validate_name(&args.name)?;

    let (config, project_dir) = load_config(global)?;
    let dir = config.migrations_dir_absolute(&project_dir);
    if !dir.is_dir() {
        anyhow::bail!(
            "Migrations directory '{}' does not exist. Run `keel init` first.",
            dir.display()
        );
    }

    let units = keel_core::discover(&dir, config.checksum)
        .context("Failed to scan existing migrations")?;
    let key = next_key(&units).context("Failed to pick the next ordering key")?;
    let id = format!("{:03}_{}", key.value(), args.name);
    let path = dir.join(format!("{id}.sql"));
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }

    let content = format!(
        "-- {id}\n-- Created {}\n\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{}", path.display());
    Ok(())
}
