//! History command implementation - prints the migration ledger

use anyhow::Result;

use crate::cli::{GlobalArgs, HistoryArgs, OutputFormat};
use crate::commands::common::{
    build_migrator, fail, print_json, print_table, short_checksum, single_line,
};

/// Execute the history command
pub(crate) async fn execute(args: &HistoryArgs, global: &GlobalArgs) -> Result<()> {
    let migrator = build_migrator(global, None).await?;
    let entries = migrator.history().await.map_err(fail)?;

    if args.output == OutputFormat::Json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("No migrations have been applied.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|e| {
            vec![
                e.id.to_string(),
                e.outcome.to_string(),
                e.applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                format!("{} ms", e.duration_ms),
                short_checksum(&e.checksum).to_string(),
                e.error.as_deref().map(single_line).unwrap_or_default(),
            ]
        })
        .collect();
    print_table(
        &["ID", "OUTCOME", "APPLIED AT", "DURATION", "CHECKSUM", "ERROR"],
        &rows,
    );
    Ok(())
}
