use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// A single value of a [`crate::types::RowBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(Value),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Returns the column type this value maps to, or `None` for [`Cell::Null`].
    pub fn column_type(&self) -> Option<ColumnType> {
        let column_type = match self {
            Cell::Null => return None,
            Cell::Bool(_) => ColumnType::Bool,
            Cell::I64(_) => ColumnType::BigInt,
            Cell::F64(_) => ColumnType::Double,
            Cell::String(_) => ColumnType::Text,
            Cell::Date(_) => ColumnType::Date,
            Cell::Timestamp(_) => ColumnType::Timestamp,
            Cell::TimestampTz(_) => ColumnType::TimestampTz,
            Cell::Json(_) => ColumnType::Jsonb,
        };

        Some(column_type)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<i32> for Cell {
    fn from(value: i32) -> Self {
        Cell::I64(value.into())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::F64(value)
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_owned())
    }
}

impl From<NaiveDate> for Cell {
    fn from(value: NaiveDate) -> Self {
        Cell::Date(value)
    }
}

impl From<NaiveDateTime> for Cell {
    fn from(value: NaiveDateTime) -> Self {
        Cell::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Cell::TimestampTz(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}

/// Postgres column type inferred for a batch column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bool,
    BigInt,
    Double,
    Text,
    Date,
    Timestamp,
    TimestampTz,
    Jsonb,
}

impl ColumnType {
    /// Returns the type name used in `create table` statements.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Bool => "boolean",
            ColumnType::BigInt => "bigint",
            ColumnType::Double => "double precision",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::TimestampTz => "timestamptz",
            ColumnType::Jsonb => "jsonb",
        }
    }

    /// Returns the type able to hold values of both types, if any.
    ///
    /// Integers widen to doubles. Every other combination of distinct types is incompatible.
    pub fn unify(self, other: ColumnType) -> Option<ColumnType> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (ColumnType::BigInt, ColumnType::Double) | (ColumnType::Double, ColumnType::BigInt) => {
                Some(ColumnType::Double)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_widen_to_doubles() {
        assert_eq!(
            ColumnType::BigInt.unify(ColumnType::Double),
            Some(ColumnType::Double)
        );
        assert_eq!(
            ColumnType::Double.unify(ColumnType::BigInt),
            Some(ColumnType::Double)
        );
        assert_eq!(ColumnType::Text.unify(ColumnType::Text), Some(ColumnType::Text));
    }

    #[test]
    fn text_and_numbers_do_not_unify() {
        assert_eq!(ColumnType::Text.unify(ColumnType::BigInt), None);
        assert_eq!(ColumnType::Date.unify(ColumnType::TimestampTz), None);
    }

    #[test]
    fn options_map_to_null() {
        assert_eq!(Cell::from(None::<i64>), Cell::Null);
        assert_eq!(Cell::from(Some("BOS")), Cell::String("BOS".to_string()));
        assert_eq!(Cell::Null.column_type(), None);
    }
}
