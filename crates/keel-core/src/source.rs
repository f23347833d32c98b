//! Migration discovery from a directory of `.sql` files.
//!
//! File names follow `<digits>[_<name>].sql`. The digits are the ordering
//! key; the file stem is the migration identifier. A file may split its
//! content with `-- !Ups` / `-- !Downs` (or `# --- !Ups`) marker lines, in
//! which case only the Ups section is executed.

use crate::checksum::ChecksumPolicy;
use crate::error::{CoreError, CoreResult};
use crate::migration::{MigrationId, MigrationUnit, OrderingKey};
use regex::Regex;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static FILE_STEM_RE: OnceLock<Regex> = OnceLock::new();
static UPS_MARKER_RE: OnceLock<Regex> = OnceLock::new();
static DOWNS_MARKER_RE: OnceLock<Regex> = OnceLock::new();

fn file_stem_re() -> &'static Regex {
    FILE_STEM_RE.get_or_init(|| Regex::new(r"^(\d+)(?:_(.*))?$").expect("valid regex"))
}

fn ups_marker_re() -> &'static Regex {
    UPS_MARKER_RE.get_or_init(|| Regex::new(r"^(?:#\s*)?-{2,3}\s*!Ups$").expect("valid regex"))
}

fn downs_marker_re() -> &'static Regex {
    DOWNS_MARKER_RE
        .get_or_init(|| Regex::new(r"^(?:#\s*)?-{2,3}\s*!Downs$").expect("valid regex"))
}

/// Discover all migration units in `dir`, ordered by key ascending.
///
/// Only `.sql` files directly inside `dir` are considered. Fails if the
/// directory is missing or unreadable, a file name has no numeric prefix,
/// a file has no executable SQL, or two files share an ordering key.
pub fn discover(dir: &Path, policy: ChecksumPolicy) -> CoreResult<Vec<MigrationUnit>> {
    if !dir.is_dir() {
        return Err(CoreError::MigrationDirNotFound {
            path: dir.display().to_string(),
        });
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| CoreError::IoWithPath {
        path: dir.display().to_string(),
        source: e,
    })? {
        let entry = entry.map_err(|e| CoreError::IoWithPath {
            path: dir.display().to_string(),
            source: e,
        })?;
        paths.push(entry.path());
    }
    // read_dir order is platform dependent; sort so duplicate-key errors
    // always name the same pair.
    paths.sort();

    let mut units: BTreeMap<OrderingKey, MigrationUnit> = BTreeMap::new();
    for path in paths {
        if !is_migration_file(&path) {
            log::debug!("Skipping non-migration entry {}", path.display());
            continue;
        }
        let unit = load_unit(&path, policy)?;
        match units.entry(unit.key) {
            Entry::Occupied(existing) => {
                return Err(CoreError::DuplicateOrderingKey {
                    key: unit.key.value(),
                    first: existing.get().id.to_string(),
                    second: unit.id.to_string(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(unit);
            }
        }
    }

    log::debug!("Discovered {} migration(s) in {}", units.len(), dir.display());
    Ok(units.into_values().collect())
}

fn is_migration_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    path.is_file() && !hidden && path.extension().is_some_and(|e| e == "sql")
}

/// Load and checksum a single migration file.
pub fn load_unit(path: &Path, policy: ChecksumPolicy) -> CoreResult<MigrationUnit> {
    let (key, id, name) = parse_file_name(path)?;

    let content = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
        path: path.display().to_string(),
        source: e,
    })?;
    let (sql, down_sql) = split_sections(&content);
    if sql.trim().is_empty() {
        return Err(CoreError::EmptyMigration {
            path: path.display().to_string(),
        });
    }

    let checksum = policy.checksum(&sql);
    Ok(MigrationUnit {
        id,
        key,
        name,
        path: path.to_path_buf(),
        sql,
        down_sql,
        checksum,
    })
}

/// Parse `<digits>[_<name>].sql` into its ordering key, identifier and name.
pub fn parse_file_name(path: &Path) -> CoreResult<(OrderingKey, MigrationId, String)> {
    let invalid = |reason: &str| CoreError::InvalidMigrationName {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| invalid("file name is not valid UTF-8"))?;

    let caps = file_stem_re()
        .captures(stem)
        .ok_or_else(|| invalid("expected a numeric prefix such as 001_create_users.sql"))?;

    let key: u64 = caps[1]
        .parse()
        .map_err(|_| invalid("ordering key does not fit in 64 bits"))?;
    let name = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();

    Ok((OrderingKey::new(key), MigrationId::new(stem), name))
}

/// Split file content into (executable, revert) sections.
///
/// Without an Ups or Downs marker the whole content is executable and there
/// is no revert section. With either marker only the Ups section executes;
/// lines before the first marker are ignored.
pub fn split_sections(content: &str) -> (String, Option<String>) {
    let has_markers = content.lines().any(|l| {
        let l = l.trim();
        ups_marker_re().is_match(l) || downs_marker_re().is_match(l)
    });
    if !has_markers {
        return (content.to_string(), None);
    }

    #[derive(PartialEq)]
    enum Section {
        None,
        Up,
        Down,
    }

    let mut up = String::new();
    let mut down = String::new();
    let mut current = Section::None;
    for line in content.lines() {
        let trimmed = line.trim();
        if ups_marker_re().is_match(trimmed) {
            current = Section::Up;
        } else if downs_marker_re().is_match(trimmed) {
            current = Section::Down;
        } else if current == Section::Up {
            up.push_str(line);
            up.push('\n');
        } else if current == Section::Down {
            down.push_str(line);
            down.push('\n');
        }
    }

    let down = down.trim().to_string();
    (
        up.trim().to_string(),
        if down.is_empty() { None } else { Some(down) },
    )
}

/// Next free ordering key after the highest key present in `units`.
pub fn next_key(units: &[MigrationUnit]) -> CoreResult<OrderingKey> {
    let Some(last) = units.iter().max_by_key(|u| u.key) else {
        return Ok(OrderingKey::new(1));
    };
    last.key
        .value()
        .checked_add(1)
        .map(OrderingKey::new)
        .ok_or_else(|| CoreError::InvalidMigrationName {
            path: last.path.display().to_string(),
            reason: "uses the largest ordering key, so no later key exists".to_string(),
        })
}

#[cfg(test)]
#[path = "source_test.rs"]
mod tests;
