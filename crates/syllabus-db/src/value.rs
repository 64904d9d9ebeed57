//! # SQL Values and Rows
//!
//! [`SqlValue`] is the one type that crosses the executor boundary in both
//! directions: statement arguments going out, row cells coming back.
//!
//! Every variant wraps an `Option`, so a NULL still knows its Postgres type.
//! That matters for predicates such as `$2::text IS NULL OR status = $2`,
//! where the server must infer the parameter type from the bound value.
//!
//! ```text
//! Rust value ──From──► SqlValue ──bind──► $N
//! column     ──decode─► SqlValue ──FromSqlValue──► Rust value
//! ```

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value as Json;

use crate::error::{DbError, DbResult};

// =============================================================================
// SqlValue
// =============================================================================

/// A typed, nullable SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Int4(Option<i32>),
    Int8(Option<i64>),
    Float8(Option<f64>),
    Bool(Option<bool>),
    Timestamptz(Option<DateTime<Utc>>),
    Jsonb(Option<Json>),
    TextArray(Option<Vec<String>>),
}

impl SqlValue {
    /// Whether the value is SQL NULL.
    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::Text(v) => v.is_none(),
            SqlValue::Int4(v) => v.is_none(),
            SqlValue::Int8(v) => v.is_none(),
            SqlValue::Float8(v) => v.is_none(),
            SqlValue::Bool(v) => v.is_none(),
            SqlValue::Timestamptz(v) => v.is_none(),
            SqlValue::Jsonb(v) => v.is_none(),
            SqlValue::TextArray(v) => v.is_none(),
        }
    }

    /// Postgres type name, as used in `$N::<type>` casts.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Text(_) => "text",
            SqlValue::Int4(_) => "int4",
            SqlValue::Int8(_) => "int8",
            SqlValue::Float8(_) => "float8",
            SqlValue::Bool(_) => "bool",
            SqlValue::Timestamptz(_) => "timestamptz",
            SqlValue::Jsonb(_) => "jsonb",
            SqlValue::TextArray(_) => "text[]",
        }
    }

    /// A typed NULL text value.
    pub fn null_text() -> Self {
        SqlValue::Text(None)
    }
}

macro_rules! sql_value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(v: $ty) -> Self {
                    SqlValue::$variant(Some(v.into()))
                }
            }

            impl From<Option<$ty>> for SqlValue {
                fn from(v: Option<$ty>) -> Self {
                    SqlValue::$variant(v.map(Into::into))
                }
            }
        )+
    };
}

sql_value_from! {
    String => Text,
    &str => Text,
    &String => Text,
    i32 => Int4,
    i64 => Int8,
    f64 => Float8,
    bool => Bool,
    DateTime<Utc> => Timestamptz,
    Json => Jsonb,
    Vec<String> => TextArray,
}

impl From<&Option<String>> for SqlValue {
    fn from(v: &Option<String>) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl From<&[String]> for SqlValue {
    fn from(v: &[String]) -> Self {
        SqlValue::TextArray(Some(v.to_vec()))
    }
}

impl From<&Vec<String>> for SqlValue {
    fn from(v: &Vec<String>) -> Self {
        SqlValue::TextArray(Some(v.clone()))
    }
}

impl From<&Json> for SqlValue {
    fn from(v: &Json) -> Self {
        SqlValue::Jsonb(Some(v.clone()))
    }
}

// =============================================================================
// FromSqlValue
// =============================================================================

/// Conversion from a row cell into a Rust value.
///
/// Non-`Option` targets reject NULL; `Option<T>` maps NULL to `None`.
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String>;
}

macro_rules! from_sql_value {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl FromSqlValue for $ty {
                fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
                    match value {
                        SqlValue::$variant(Some(v)) => Ok(v.clone()),
                        SqlValue::$variant(None) => Err("unexpected NULL".to_string()),
                        other => Err(format!(
                            "expected {}, found {}",
                            stringify!($variant),
                            other.type_name()
                        )),
                    }
                }
            }
        )+
    };
}

from_sql_value! {
    String => Text,
    i32 => Int4,
    f64 => Float8,
    bool => Bool,
    DateTime<Utc> => Timestamptz,
    Json => Jsonb,
    Vec<String> => TextArray,
}

/// `INT8` columns; `INT4` cells (e.g. `COUNT(*)::int`) widen losslessly.
impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        match value {
            SqlValue::Int8(Some(v)) => Ok(*v),
            SqlValue::Int4(Some(v)) => Ok(i64::from(*v)),
            SqlValue::Int8(None) | SqlValue::Int4(None) => Err("unexpected NULL".to_string()),
            other => Err(format!("expected Int8, found {}", other.type_name())),
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> Result<Self, String> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_sql_value(value).map(Some)
    }
}

// =============================================================================
// Row
// =============================================================================

/// One result row: column names in select order plus their values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Builds a row; `columns` and `values` must be the same length.
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Row { columns, values }
    }

    /// Builds a row from `(column, value)` pairs.
    pub fn from_pairs<I, C>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, SqlValue)>,
        C: Into<String>,
    {
        let (columns, values) = pairs.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Row { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw cell by column name.
    pub fn value(&self, column: &str) -> DbResult<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
            .ok_or_else(|| DbError::Decode {
                column: column.to_string(),
                message: "no such column in result".to_string(),
            })
    }

    /// Decodes the cell named `column`.
    pub fn get<T: FromSqlValue>(&self, column: &str) -> DbResult<T> {
        let value = self.value(column)?;
        T::from_sql_value(value).map_err(|message| DbError::Decode {
            column: column.to_string(),
            message,
        })
    }

    /// Decodes a text cell through [`FromStr`] (status and kind columns).
    pub fn get_parsed<T>(&self, column: &str) -> DbResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let text: String = self.get(column)?;
        text.parse().map_err(|e: T::Err| DbError::Decode {
            column: column.to_string(),
            message: e.to_string(),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use syllabus_core::TopicStatus;

    fn sample_row() -> Row {
        Row::from_pairs([
            ("topic_id", SqlValue::from("topic-1")),
            ("total_los", SqlValue::from(3_i32)),
            ("icon_url", SqlValue::Text(None)),
            ("status", SqlValue::from("TOPIC_STATUS_PUBLISHED")),
        ])
    }

    #[test]
    fn test_get_typed_columns() {
        let row = sample_row();
        assert_eq!(row.get::<String>("topic_id").unwrap(), "topic-1");
        assert_eq!(row.get::<i32>("total_los").unwrap(), 3);
        assert_eq!(row.get::<i64>("total_los").unwrap(), 3);
        assert_eq!(row.get::<Option<String>>("icon_url").unwrap(), None);
    }

    #[test]
    fn test_null_into_non_option_is_decode_error() {
        let row = sample_row();
        let err = row.get::<String>("icon_url").unwrap_err();
        assert!(matches!(err, DbError::Decode { ref column, .. } if column == "icon_url"));
    }

    #[test]
    fn test_missing_column_and_type_mismatch() {
        let row = sample_row();
        assert!(row.get::<String>("chapter_id").is_err());
        assert!(row.get::<bool>("topic_id").is_err());
    }

    #[test]
    fn test_get_parsed_status() {
        let row = sample_row();
        let status: TopicStatus = row.get_parsed("status").unwrap();
        assert_eq!(status, TopicStatus::Published);
        assert!(row.get_parsed::<TopicStatus>("topic_id").is_err());
    }

    #[test]
    fn test_option_conversions_keep_type() {
        let none: Option<i32> = None;
        let value = SqlValue::from(none);
        assert!(value.is_null());
        assert_eq!(value.type_name(), "int4");
    }
}
