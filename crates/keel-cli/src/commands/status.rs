//! Status command implementation - dry run of the migration plan

use anyhow::Result;
use keel_engine::{StatusReport, UnitState};

use crate::cli::{GlobalArgs, OutputFormat, StatusArgs};
use crate::commands::common::{
    build_migrator, fail, print_json, print_table, short_checksum, single_line,
};

/// Execute the status command
pub(crate) async fn execute(args: &StatusArgs, global: &GlobalArgs) -> Result<()> {
    let migrator = build_migrator(global, None).await?;
    let report = migrator.status().await.map_err(fail)?;

    match args.output {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_status_table(&report),
    }
    Ok(())
}

fn state_label(state: UnitState) -> &'static str {
    match state {
        UnitState::Applied => "applied",
        UnitState::Pending => "pending",
        UnitState::Retry => "retry",
    }
}

fn print_status_table(report: &StatusReport) {
    if report.entries.is_empty() {
        println!("No migrations found.");
    } else {
        let rows: Vec<Vec<String>> = report
            .entries
            .iter()
            .map(|e| {
                vec![
                    e.id.to_string(),
                    state_label(e.state).to_string(),
                    e.applied_at
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    short_checksum(&e.checksum).to_string(),
                    e.last_error.as_deref().map(single_line).unwrap_or_default(),
                ]
            })
            .collect();
        print_table(&["ID", "STATE", "APPLIED AT", "CHECKSUM", "LAST ERROR"], &rows);
    }

    for id in &report.orphaned {
        println!("warning: {id} is in the ledger but has no migration file");
    }

    println!(
        "\n{} applied, {} pending",
        report.applied_count(),
        report.pending_count()
    );
}
