use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};

use crate::bail;
use crate::error::{ErrorKind, IngestResult};
use crate::types::{Cell, ColumnType};

/// Rows sharing one column schema, handed to the merge engine by a producer.
///
/// Column types are inferred once at construction: every non-null value of a column must map
/// to the same [`ColumnType`], except integers and doubles which widen to doubles. Columns
/// holding only nulls are typed as text.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    columns: Vec<String>,
    column_types: Vec<ColumnType>,
    rows: Vec<Vec<Cell>>,
}

impl RowBatch {
    /// Creates a batch, validating the shape of every row.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> IngestResult<RowBatch> {
        if columns.is_empty() && !rows.is_empty() {
            bail!(ErrorKind::InvalidBatch, "Batch rows have no columns");
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if column.is_empty() {
                bail!(ErrorKind::InvalidBatch, "Batch column name is empty");
            }
            if !seen.insert(column.as_str()) {
                bail!(
                    ErrorKind::InvalidBatch,
                    "Batch column name is repeated",
                    format!("column `{column}`")
                );
            }
        }

        for (index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                bail!(
                    ErrorKind::InvalidBatch,
                    "Batch row width does not match its columns",
                    format!(
                        "row {index} has {} values, expected {}",
                        row.len(),
                        columns.len()
                    )
                );
            }
        }

        let column_types = infer_column_types(&columns, &rows)?;

        Ok(RowBatch {
            columns,
            column_types,
            rows,
        })
    }

    /// Creates a batch without rows or columns.
    pub fn empty() -> RowBatch {
        RowBatch {
            columns: Vec::new(),
            column_types: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Builds a batch from JSON objects, one per row.
    ///
    /// Keys are lower-cased and columns are ordered by first appearance. A key missing from a
    /// record is a null. Strings are typed as dates when every non-null value of the column is
    /// an ISO `YYYY-MM-DD` date, and as timestamps with time zone when every value is an
    /// RFC 3339 timestamp. Arrays and objects are stored as JSON.
    pub fn from_json_records(records: Vec<Map<String, Value>>) -> IngestResult<RowBatch> {
        let mut columns: Vec<String> = Vec::new();
        let mut lowered_records = Vec::with_capacity(records.len());

        for record in records {
            let mut lowered = Map::with_capacity(record.len());
            for (key, value) in record {
                let key = key.to_lowercase();
                if lowered.contains_key(&key) {
                    bail!(
                        ErrorKind::InvalidBatch,
                        "Batch record repeats a column after lower-casing",
                        format!("column `{key}`")
                    );
                }
                if !columns.contains(&key) {
                    columns.push(key.clone());
                }
                lowered.insert(key, value);
            }
            lowered_records.push(lowered);
        }

        let text_kinds: Vec<TextKind> = columns
            .iter()
            .map(|column| detect_text_kind(column, &lowered_records))
            .collect();

        let rows = lowered_records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .zip(&text_kinds)
                    .map(|(column, text_kind)| {
                        json_to_cell(record.remove(column).unwrap_or(Value::Null), *text_kind)
                    })
                    .collect()
            })
            .collect();

        RowBatch::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_types(&self) -> &[ColumnType] {
        &self.column_types
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.iter().any(|column| column == name)
    }

    /// Returns `(name, type)` pairs in column order.
    pub fn typed_columns(&self) -> impl Iterator<Item = (&str, ColumnType)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.column_types.iter().copied())
    }
}

fn infer_column_types(columns: &[String], rows: &[Vec<Cell>]) -> IngestResult<Vec<ColumnType>> {
    let mut inferred: Vec<Option<ColumnType>> = vec![None; columns.len()];

    for row in rows {
        for (index, cell) in row.iter().enumerate() {
            let Some(cell_type) = cell.column_type() else {
                continue;
            };

            inferred[index] = match inferred[index] {
                None => Some(cell_type),
                Some(current) => match current.unify(cell_type) {
                    Some(unified) => Some(unified),
                    None => bail!(
                        ErrorKind::InvalidBatch,
                        "Batch column mixes incompatible value types",
                        format!("column `{}` holds {current} and {cell_type}", columns[index])
                    ),
                },
            };
        }
    }

    Ok(inferred
        .into_iter()
        .map(|column_type| column_type.unwrap_or(ColumnType::Text))
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TextKind {
    Text,
    Date,
    TimestampTz,
}

fn detect_text_kind(column: &str, records: &[Map<String, Value>]) -> TextKind {
    let mut strings = records
        .iter()
        .filter_map(|record| record.get(column))
        .filter(|value| !value.is_null())
        .peekable();

    if strings.peek().is_none() {
        return TextKind::Text;
    }

    let values: Vec<&Value> = strings.collect();
    let Some(texts) = values
        .iter()
        .map(|value| value.as_str())
        .collect::<Option<Vec<&str>>>()
    else {
        return TextKind::Text;
    };

    if texts.iter().all(|text| parse_date(text).is_some()) {
        TextKind::Date
    } else if texts.iter().all(|text| parse_timestamptz(text).is_some()) {
        TextKind::TimestampTz
    } else {
        TextKind::Text
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn parse_timestamptz(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}

fn json_to_cell(value: Value, text_kind: TextKind) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Bool(value) => Cell::Bool(value),
        Value::Number(number) => match number.as_i64() {
            Some(value) => Cell::I64(value),
            None => number
                .as_f64()
                .map(Cell::F64)
                .unwrap_or_else(|| Cell::String(number.to_string())),
        },
        Value::String(text) => match text_kind {
            TextKind::Date => parse_date(&text).map(Cell::Date).unwrap_or(Cell::String(text)),
            TextKind::TimestampTz => parse_timestamptz(&text)
                .map(Cell::TimestampTz)
                .unwrap_or(Cell::String(text)),
            TextKind::Text => Cell::String(text),
        },
        value @ (Value::Array(_) | Value::Object(_)) => Cell::Json(value),
    }
}
