//! Backend-neutral parameter and result values.

use crate::error::{DbError, DbResult};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Timestamp text format used for TIMESTAMP parameters and results.
///
/// Naive UTC with microseconds, which every backend can cast from text.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A single bound parameter or result column
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    /// Render as text; `None` for NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Timestamp(ts) => Some(format_timestamp(ts)),
        }
    }

    /// Integer value, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Timestamp value; text columns are parsed with the shared format.
    pub fn as_timestamp(&self) -> DbResult<DateTime<Utc>> {
        match self {
            SqlValue::Timestamp(ts) => Ok(*ts),
            SqlValue::Text(s) => parse_timestamp(s),
            other => Err(DbError::DecodeError(format!(
                "expected timestamp, found {other:?}"
            ))),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Int(i)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(ts: DateTime<Utc>) -> Self {
        SqlValue::Timestamp(ts)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One result row
#[derive(Debug, Clone, PartialEq)]
pub struct Row(pub Vec<SqlValue>);

impl Row {
    /// Column value by position
    pub fn get(&self, idx: usize) -> DbResult<&SqlValue> {
        self.0
            .get(idx)
            .ok_or_else(|| DbError::DecodeError(format!("column index {idx} out of range")))
    }

    /// Non-null text column
    pub fn text(&self, idx: usize) -> DbResult<String> {
        self.get(idx)?
            .as_text()
            .ok_or_else(|| DbError::DecodeError(format!("column {idx} is NULL")))
    }

    /// Nullable text column
    pub fn opt_text(&self, idx: usize) -> DbResult<Option<String>> {
        Ok(self.get(idx)?.as_text())
    }

    /// Integer column, NULL read as 0
    pub fn int(&self, idx: usize) -> DbResult<i64> {
        match self.get(idx)? {
            SqlValue::Null => Ok(0),
            v => v
                .as_int()
                .ok_or_else(|| DbError::DecodeError(format!("column {idx} is not an integer"))),
        }
    }

    /// Timestamp column
    pub fn timestamp(&self, idx: usize) -> DbResult<DateTime<Utc>> {
        self.get(idx)?.as_timestamp()
    }
}

/// Format a timestamp for binding as text.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp rendered by the database (`2024-01-01 12:00:00[.ffffff]`).
pub fn parse_timestamp(s: &str) -> DbResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_PARSE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| DbError::DecodeError(format!("invalid timestamp '{s}': {e}")))
}
