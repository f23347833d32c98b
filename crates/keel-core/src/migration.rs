//! Migration unit representation

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;

/// Position of a migration in the total order of units.
///
/// Parsed from the numeric prefix of the file name, so `001_init` and
/// `1_init` both carry key 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderingKey(u64);

impl OrderingKey {
    /// Wrap a raw key value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Return the raw key value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strongly-typed migration identifier (the file stem, e.g. `001_create_users`).
///
/// This is the value recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MigrationId(String);

impl MigrationId {
    /// Create a new `MigrationId`, panicking in debug builds if it is empty.
    pub fn new(id: impl Into<String>) -> Self {
        let s = id.into();
        debug_assert!(!s.is_empty(), "MigrationId must not be empty");
        Self(s)
    }

    /// Return the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MigrationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for MigrationId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MigrationId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for MigrationId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// One discrete, ordered schema-change script.
///
/// Units are rebuilt from the migrations directory on every run and never
/// mutated after discovery.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationUnit {
    /// Identifier recorded in the ledger
    pub id: MigrationId,

    /// Ordering key parsed from the file name
    pub key: OrderingKey,

    /// Human-readable part of the file name (may be empty)
    pub name: String,

    /// Source file
    pub path: PathBuf,

    /// Executable SQL
    #[serde(skip)]
    pub sql: String,

    /// Revert section of a `!Ups` / `!Downs` file, kept for display only
    #[serde(skip)]
    pub down_sql: Option<String>,

    /// Checksum of `sql` under the configured policy
    pub checksum: String,
}

impl MigrationUnit {
    /// Short label for log lines and reports (`001_create_users`).
    pub fn label(&self) -> &str {
        self.id.as_str()
    }
}
