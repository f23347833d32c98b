use super::*;
use clap::CommandFactory;

#[test]
fn verify_cli_args() {
    // Validates the entire command tree: short flag conflicts,
    // duplicate args, and other clap definition errors.
    Cli::command().debug_assert();
}

#[test]
fn global_args_after_subcommand() {
    let cli = Cli::try_parse_from([
        "keel",
        "migrate",
        "-p",
        "/tmp/project",
        "--database",
        "app.duckdb",
        "--lock-timeout",
        "0",
        "--output",
        "json",
    ])
    .unwrap();

    assert_eq!(cli.global.project_dir, "/tmp/project");
    assert_eq!(cli.global.database.as_deref(), Some("app.duckdb"));
    match cli.command {
        Commands::Migrate(args) => {
            assert_eq!(args.lock_timeout, Some(0));
            assert_eq!(args.output, OutputFormat::Json);
        }
        other => panic!("expected migrate, got {other:?}"),
    }
}

#[test]
fn new_requires_name() {
    assert!(Cli::try_parse_from(["keel", "new"]).is_err());
    let cli = Cli::try_parse_from(["keel", "new", "add_users"]).unwrap();
    assert!(matches!(cli.command, Commands::New(ref a) if a.name == "add_users"));
}
