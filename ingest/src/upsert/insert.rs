use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::query_builder::Separated;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::debug;

use crate::types::{Cell, ColumnType, RowBatch};

/// Maximum number of bind parameters Postgres accepts in one statement.
const MAX_BIND_PARAMETERS: usize = 65_535;

/// Inserts every row of `batch` into `target`, which must already be a quoted identifier.
///
/// Rows are sent in multi-row `insert` statements sized to stay under the bind parameter limit.
/// Values are bound with the batch's inferred column types, so nulls keep their type.
pub(crate) async fn insert_rows(
    conn: &mut PgConnection,
    target: &str,
    batch: &RowBatch,
) -> Result<u64, sqlx::Error> {
    if batch.is_empty() {
        return Ok(0);
    }

    let column_list = ingest_postgres::quote_identifier_list(batch.columns());
    let column_types = batch.column_types();
    let rows_per_statement = rows_per_statement(batch.columns().len());

    let mut inserted = 0;
    for chunk in batch.rows().chunks(rows_per_statement) {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("insert into {target} ({column_list}) "));
        builder.push_values(chunk, |mut separated, row| {
            for (cell, column_type) in row.iter().zip(column_types) {
                push_cell(&mut separated, cell, *column_type);
            }
        });

        inserted += builder
            .build()
            .persistent(false)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }

    debug!(target_table = target, rows = inserted, "inserted batch rows");

    Ok(inserted)
}

fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMETERS / column_count.max(1)).max(1)
}

fn push_cell<'args>(
    separated: &mut Separated<'_, 'args, Postgres, &'static str>,
    cell: &Cell,
    column_type: ColumnType,
) {
    match (cell, column_type) {
        (Cell::Null, ColumnType::Bool) => separated.push_bind(None::<bool>),
        (Cell::Null, ColumnType::BigInt) => separated.push_bind(None::<i64>),
        (Cell::Null, ColumnType::Double) => separated.push_bind(None::<f64>),
        (Cell::Null, ColumnType::Text) => separated.push_bind(None::<String>),
        (Cell::Null, ColumnType::Date) => separated.push_bind(None::<NaiveDate>),
        (Cell::Null, ColumnType::Timestamp) => separated.push_bind(None::<NaiveDateTime>),
        (Cell::Null, ColumnType::TimestampTz) => separated.push_bind(None::<DateTime<Utc>>),
        (Cell::Null, ColumnType::Jsonb) => separated.push_bind(None::<serde_json::Value>),
        // Integer cells of a widened column.
        (Cell::I64(value), ColumnType::Double) => separated.push_bind(*value as f64),
        (Cell::Bool(value), _) => separated.push_bind(*value),
        (Cell::I64(value), _) => separated.push_bind(*value),
        (Cell::F64(value), _) => separated.push_bind(*value),
        (Cell::String(value), _) => separated.push_bind(value.clone()),
        (Cell::Date(value), _) => separated.push_bind(*value),
        (Cell::Timestamp(value), _) => separated.push_bind(*value),
        (Cell::TimestampTz(value), _) => separated.push_bind(*value),
        (Cell::Json(value), _) => separated.push_bind(value.clone()),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_stay_under_bind_limit() {
        assert_eq!(rows_per_statement(1), 65_535);
        assert_eq!(rows_per_statement(3), 21_845);
        assert!(rows_per_statement(3) * 3 <= MAX_BIND_PARAMETERS);
        assert_eq!(rows_per_statement(70_000), 1);
        assert_eq!(rows_per_statement(0), 65_535);
    }
}
