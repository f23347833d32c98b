use super::*;
use std::fs;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) {
    fs::write(dir.path().join(name), content).unwrap();
}

#[test]
fn test_discover_orders_by_key_not_by_name() {
    let dir = TempDir::new().unwrap();
    write(&dir, "10_later.sql", "SELECT 10;");
    write(&dir, "2_second.sql", "SELECT 2;");
    write(&dir, "001_first.sql", "SELECT 1;");

    let units = discover(dir.path(), ChecksumPolicy::Exact).unwrap();
    let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["001_first", "2_second", "10_later"]);
    assert_eq!(units[0].key.value(), 1);
    assert_eq!(units[0].name, "first");
}

#[test]
fn test_discover_is_deterministic() {
    let dir = TempDir::new().unwrap();
    write(&dir, "001_a.sql", "CREATE TABLE a (id INT);");
    write(&dir, "002_b.sql", "CREATE TABLE b (id INT);");

    let first = discover(dir.path(), ChecksumPolicy::Exact).unwrap();
    let second = discover(dir.path(), ChecksumPolicy::Exact).unwrap();
    let summarize = |units: &[MigrationUnit]| {
        units
            .iter()
            .map(|u| (u.id.to_string(), u.checksum.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(summarize(&first), summarize(&second));
}

#[test]
fn test_discover_rejects_duplicate_ordering_key() {
    let dir = TempDir::new().unwrap();
    write(&dir, "001_create_table.sql", "SELECT 1;");
    write(&dir, "1_other.sql", "SELECT 2;");
    write(&dir, "003_unrelated.sql", "SELECT 3;");

    let err = discover(dir.path(), ChecksumPolicy::Exact).unwrap_err();
    match err {
        CoreError::DuplicateOrderingKey { key, first, second } => {
            assert_eq!(key, 1);
            assert_eq!(first, "001_create_table");
            assert_eq!(second, "1_other");
        }
        other => panic!("expected DuplicateOrderingKey, got {other}"),
    }
}

#[test]
fn test_discover_rejects_name_without_numeric_prefix() {
    let dir = TempDir::new().unwrap();
    write(&dir, "create_users.sql", "SELECT 1;");

    let err = discover(dir.path(), ChecksumPolicy::Exact).unwrap_err();
    assert!(matches!(err, CoreError::InvalidMigrationName { .. }));
    assert!(err.is_discovery());
}

#[test]
fn test_discover_rejects_key_overflow() {
    let dir = TempDir::new().unwrap();
    write(&dir, "99999999999999999999999_huge.sql", "SELECT 1;");

    let err = discover(dir.path(), ChecksumPolicy::Exact).unwrap_err();
    assert!(err.to_string().contains("64 bits"));
}

#[test]
fn test_discover_missing_dir() {
    let dir = TempDir::new().unwrap();
    let err = discover(&dir.path().join("nope"), ChecksumPolicy::Exact).unwrap_err();
    assert!(matches!(err, CoreError::MigrationDirNotFound { .. }));
}

#[test]
fn test_discover_skips_other_files_and_subdirs() {
    let dir = TempDir::new().unwrap();
    write(&dir, "001_init.sql", "SELECT 1;");
    write(&dir, "README.md", "notes");
    write(&dir, ".002_hidden.sql", "SELECT 2;");
    fs::create_dir(dir.path().join("003_dir.sql")).unwrap();

    let units = discover(dir.path(), ChecksumPolicy::Exact).unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].id, "001_init");
}

#[test]
fn test_discover_rejects_empty_file() {
    let dir = TempDir::new().unwrap();
    write(&dir, "001_empty.sql", "  \n\n");

    let err = discover(dir.path(), ChecksumPolicy::Exact).unwrap_err();
    assert!(matches!(err, CoreError::EmptyMigration { .. }));
}

#[test]
fn test_bare_numeric_file_name() {
    let (key, id, name) = parse_file_name(Path::new("migrations/7.sql")).unwrap();
    assert_eq!(key.value(), 7);
    assert_eq!(id, "7");
    assert!(name.is_empty());
}

#[test]
fn test_timestamp_file_name() {
    let (key, id, name) =
        parse_file_name(Path::new("20240101120000_add_orders.sql")).unwrap();
    assert_eq!(key.value(), 20240101120000);
    assert_eq!(id, "20240101120000_add_orders");
    assert_eq!(name, "add_orders");
}

#[test]
fn test_split_sections_without_markers_keeps_everything() {
    let (up, down) = split_sections("CREATE TABLE t (id INT);\n");
    assert_eq!(up, "CREATE TABLE t (id INT);\n");
    assert!(down.is_none());
}

#[test]
fn test_split_sections_with_markers() {
    let content = "\
-- leading comment is ignored
# --- !Ups
CREATE TABLE users (id INT);
CREATE INDEX users_id ON users (id);

# --- !Downs
DROP TABLE users;
";
    let (up, down) = split_sections(content);
    assert_eq!(
        up,
        "CREATE TABLE users (id INT);\nCREATE INDEX users_id ON users (id);"
    );
    assert_eq!(down.as_deref(), Some("DROP TABLE users;"));
}

#[test]
fn test_split_sections_sql_comment_markers() {
    let (up, down) = split_sections("-- !Ups\nSELECT 1;\n-- !Downs\n");
    assert_eq!(up, "SELECT 1;");
    assert!(down.is_none());
}

#[test]
fn test_split_sections_downs_marker_alone_keeps_revert_out() {
    let (up, down) = split_sections("CREATE TABLE t (i INT);\n-- !Downs\nDROP TABLE t;\n");
    assert_eq!(up, "");
    assert_eq!(down.as_deref(), Some("DROP TABLE t;"));
}

#[test]
fn test_discover_rejects_downs_only_file() {
    let dir = TempDir::new().unwrap();
    write(&dir, "001_a.sql", "CREATE TABLE t (i INT);\n# --- !Downs\nDROP TABLE t;\n");
    let err = discover(dir.path(), ChecksumPolicy::Exact).unwrap_err();
    assert!(matches!(err, CoreError::EmptyMigration { .. }));
}

#[test]
fn test_checksum_covers_only_executable_section() {
    let dir = TempDir::new().unwrap();
    write(&dir, "001_a.sql", "-- !Ups\nSELECT 1;\n-- !Downs\nSELECT 0;\n");
    let before = discover(dir.path(), ChecksumPolicy::Exact).unwrap();

    write(&dir, "001_a.sql", "-- !Ups\nSELECT 1;\n-- !Downs\nSELECT 'changed';\n");
    let after = discover(dir.path(), ChecksumPolicy::Exact).unwrap();

    assert_eq!(before[0].checksum, after[0].checksum);
}

#[test]
fn test_next_key() {
    let dir = TempDir::new().unwrap();
    assert_eq!(next_key(&[]).unwrap().value(), 1);

    write(&dir, "001_a.sql", "SELECT 1;");
    write(&dir, "005_b.sql", "SELECT 5;");
    let units = discover(dir.path(), ChecksumPolicy::Exact).unwrap();
    assert_eq!(next_key(&units).unwrap().value(), 6);
}

#[test]
fn test_next_key_after_largest_key_fails() {
    let dir = TempDir::new().unwrap();
    write(&dir, &format!("{}_last.sql", u64::MAX), "SELECT 1;");
    let units = discover(dir.path(), ChecksumPolicy::Exact).unwrap();

    let err = next_key(&units).unwrap_err();
    assert!(matches!(err, CoreError::InvalidMigrationName { .. }));
}
