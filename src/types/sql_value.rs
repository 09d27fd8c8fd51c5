use std::fmt;

use serde::ser::Error as _;
use serde::{Serialize, Serializer};

/// Represents a SQL value in a driver-agnostic way.
/// Used both for bound parameters and for result cells.
/// Drivers are responsible for converting these to and from their native types.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Bool(bool),
}

impl SqlValue {
    /// Byte-array column values are carried as text.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Renders the value as a SQL literal: `NULL` or a single-quoted string.
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Int32(i) => write!(f, "{}", i),
            SqlValue::Int64(i) => write!(f, "{}", i),
            SqlValue::Float64(v) => write!(f, "{}", v),
            SqlValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Text(s) => serializer.serialize_str(s),
            SqlValue::Int32(i) => serializer.serialize_i32(*i),
            SqlValue::Int64(i) => serializer.serialize_i64(*i),
            SqlValue::Float64(v) if v.is_finite() => serializer.serialize_f64(*v),
            SqlValue::Float64(v) => Err(S::Error::custom(format!(
                "float value {} has no JSON representation",
                v
            ))),
            SqlValue::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int32(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int64(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float64(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}
