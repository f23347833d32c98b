//! Init command implementation - scaffolds keel.yml and the migrations directory

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::cli::{GlobalArgs, InitArgs};

/// Execute the init command
pub(crate) async fn execute(args: &InitArgs, global: &GlobalArgs) -> Result<()> {
    // Keep the migrations directory inside the project
    if args.migrations_dir.is_empty()
        || args.migrations_dir.contains("..")
        || Path::new(&args.migrations_dir).is_absolute()
    {
        anyhow::bail!(
            "Invalid migrations directory '{}': must be a relative path inside the project",
            args.migrations_dir
        );
    }

    let project_dir = Path::new(&global.project_dir);
    for name in ["keel.yml", "keel.yaml"] {
        if project_dir.join(name).exists() {
            anyhow::bail!(
                "{} already exists in '{}'. Refusing to overwrite it.",
                name,
                project_dir.display()
            );
        }
    }

    let migrations_dir = project_dir.join(&args.migrations_dir);
    fs::create_dir_all(&migrations_dir)
        .with_context(|| format!("Failed to create directory: {}", migrations_dir.display()))?;

    // Escape YAML special characters in interpolated values
    let safe_dir = args.migrations_dir.replace('"', "\\\"");
    let safe_db_path = global
        .database
        .as_deref()
        .unwrap_or("keel.duckdb")
        .replace('"', "\\\"");
    let config_content = format!(
        r#"migrations_dir: "{safe_dir}"
namespace: default

database:
  type: duckdb
  path: "{safe_db_path}"

lock:
  timeout_secs: 10
  poll_interval_ms: 1000
  # stale_after_secs: 3600   # break locks left behind by crashed runs

# per_migration commits each file on its own; single commits all or nothing
transaction: per_migration

# exact | normalized (ignores trailing whitespace and line endings)
checksum: exact

# targets:
#   prod:
#     database:
#       type: duckdb
#       path: "/srv/prod.duckdb"
"#
    );

    let config_path = project_dir.join("keel.yml");
    fs::write(&config_path, config_content)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("Created {}", config_path.display());
    println!("Created {}/", migrations_dir.display());
    println!("\nNext: keel new <name> to add your first migration");
    Ok(())
}
