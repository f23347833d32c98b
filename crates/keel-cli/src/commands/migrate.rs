//! Migrate command implementation - applies pending migrations under the lock

use anyhow::Result;
use keel_engine::{ApplyReport, UnitStatus};

use crate::cli::{GlobalArgs, MigrateArgs, OutputFormat};
use crate::commands::common::{
    build_migrator, fail, print_json, print_table, single_line, ExitCode, EXIT_MIGRATION_FAILED,
};

/// Execute the migrate command
pub(crate) async fn execute(args: &MigrateArgs, global: &GlobalArgs) -> Result<()> {
    let migrator = build_migrator(global, args.lock_timeout).await?;
    let report = migrator.migrate().await.map_err(fail)?;

    match args.output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_apply_table(&report),
    }

    if let Some(failed) = report.failure() {
        if args.output == OutputFormat::Table {
            if let UnitStatus::Failed { error } = &failed.status {
                eprintln!("Error: migration {} failed: {error}", failed.id);
            }
        }
        return Err(ExitCode(EXIT_MIGRATION_FAILED).into());
    }
    Ok(())
}

fn print_apply_table(report: &ApplyReport) {
    if report.outcomes.is_empty() {
        println!("Database is up to date.");
        return;
    }

    let rows: Vec<Vec<String>> = report
        .outcomes
        .iter()
        .map(|o| {
            let (status, detail) = match &o.status {
                UnitStatus::Applied { duration_ms } => ("applied", format!("{duration_ms} ms")),
                UnitStatus::Failed { error } => ("failed", single_line(error)),
                UnitStatus::RolledBack => ("rolled back", String::new()),
            };
            vec![o.id.to_string(), status.to_string(), detail]
        })
        .collect();
    print_table(&["ID", "STATUS", "DETAIL"], &rows);
    println!(
        "\n{} of {} migration(s) applied ({} mode)",
        report.applied_count(),
        report.outcomes.len(),
        report.mode
    );
}
