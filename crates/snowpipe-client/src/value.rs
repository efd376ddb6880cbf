//! Producer-supplied row values
//!
//! Rows are maps from column name to a tagged [`RowValue`]; the normalizer
//! coerces each value to the service's column-typed JSON representation at
//! flush time.

use std::collections::BTreeMap;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

/// One producer-supplied value
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    /// SQL NULL (omitted from the serialized row)
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Exact decimal for NUMBER columns with precision/scale
    Decimal(BigDecimal),
    Str(String),
    /// Raw bytes for BINARY columns (emitted as base64)
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Point in time; zoned inputs are converted to UTC on construction
    Timestamp(DateTime<Utc>),
    /// Pre-built JSON for VARIANT columns
    Json(serde_json::Value),
}

impl RowValue {
    /// Kind name for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Decimal(_) => "decimal",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }

    /// Whether this is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for RowValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for RowValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for RowValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for RowValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<BigDecimal> for RowValue {
    fn from(v: BigDecimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<&str> for RowValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for RowValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for RowValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for RowValue {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<Uuid> for RowValue {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<NaiveDate> for RowValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for RowValue {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<DateTime<Utc>> for RowValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<serde_json::Value> for RowValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<RowValue>> From<Option<T>> for RowValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// One row keyed by column name
///
/// A BTreeMap keeps serialization order deterministic.
pub type Row = BTreeMap<String, RowValue>;

/// Build a row from `(column, value)` pairs
pub fn row<const N: usize>(pairs: [(&str, RowValue); N]) -> Row {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}
