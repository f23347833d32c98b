//! SHA-256 checksums used to detect drift in applied migrations.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compute SHA256 checksum of a string
pub fn compute_checksum(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// How migration content is normalized before hashing.
///
/// The policy in force when a migration was applied must stay in force
/// afterwards; switching it changes every checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Hash the exact bytes of the content (default)
    #[default]
    Exact,
    /// Normalize line endings to `\n` and drop trailing whitespace on each
    /// line and at the end of the content
    Normalized,
}

impl ChecksumPolicy {
    /// Checksum `content` under this policy.
    pub fn checksum(self, content: &str) -> String {
        match self {
            ChecksumPolicy::Exact => compute_checksum(content),
            ChecksumPolicy::Normalized => compute_checksum(&normalize(content)),
        }
    }
}

fn normalize(content: &str) -> String {
    let lines: Vec<&str> = content.lines().map(str::trim_end).collect();
    lines.join("\n").trim_end().to_string()
}

impl std::fmt::Display for ChecksumPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumPolicy::Exact => write!(f, "exact"),
            ChecksumPolicy::Normalized => write!(f, "normalized"),
        }
    }
}
