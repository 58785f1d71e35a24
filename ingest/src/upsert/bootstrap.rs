use pg_escape::quote_identifier;
use sqlx::{Connection, PgConnection};
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, IngestError};
use crate::types::{RowBatch, TableName};
use crate::upsert::insert::insert_rows;
use crate::upsert::{classify, sql_state};

/// SQLSTATE raised when a relation already exists.
const DUPLICATE_TABLE: &str = "42P07";

/// SQLSTATE raised when a schema already exists.
const DUPLICATE_SCHEMA: &str = "42P06";

/// SQLSTATE raised when a concurrent `create` collides on a catalog index.
const UNIQUE_VIOLATION: &str = "23505";

pub(crate) enum BootstrapError {
    /// Another session created the table or its namespace first.
    AlreadyExists,
    Failed(IngestError),
}

/// Creates `table` from the batch's inferred shape and inserts every row, in one transaction.
///
/// The namespace is created when missing. When timestamp tracking is requested the column is
/// added as `timestamptz not null default now()`.
pub(crate) async fn create_and_load(
    conn: &mut PgConnection,
    table: &TableName,
    batch: &RowBatch,
    timestamp_column: Option<&str>,
) -> Result<u64, BootstrapError> {
    let mut tx = conn.begin().await.map_err(|err| {
        BootstrapError::Failed(classify(
            err,
            ErrorKind::TableCreationFailed,
            "Failed to start bootstrap transaction",
            table,
        ))
    })?;

    let result = create_in_transaction(&mut tx, table, batch, timestamp_column).await;

    match result {
        Ok(rows) => {
            tx.commit().await.map_err(|err| {
                BootstrapError::Failed(classify(
                    err,
                    ErrorKind::TableCreationFailed,
                    "Failed to commit new destination table",
                    table,
                ))
            })?;
            info!(table = %table, rows, "created destination table");

            Ok(rows)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(
                    table = %table,
                    error = %rollback_err,
                    "failed to roll back bootstrap transaction"
                );
            }

            Err(err)
        }
    }
}

async fn create_in_transaction(
    tx: &mut PgConnection,
    table: &TableName,
    batch: &RowBatch,
    timestamp_column: Option<&str>,
) -> Result<u64, BootstrapError> {
    let namespace_exists: bool = sqlx::query_scalar(
        "select exists (select 1 from pg_catalog.pg_namespace where nspname = $1)",
    )
    .bind(&table.schema)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| {
        BootstrapError::Failed(classify(
            err,
            ErrorKind::TableCreationFailed,
            "Failed to look up destination namespace",
            table,
        ))
    })?;

    if !namespace_exists {
        sqlx::query(&format!(
            "create schema if not exists {}",
            table.quoted_schema()
        ))
        .execute(&mut *tx)
        .await
        .map_err(|err| match sql_state(&err).as_deref() {
            Some(DUPLICATE_SCHEMA | UNIQUE_VIOLATION) => BootstrapError::AlreadyExists,
            _ => BootstrapError::Failed(classify(
                err,
                ErrorKind::TableCreationFailed,
                "Failed to create destination namespace",
                table,
            )),
        })?;
        info!(namespace = %table.schema, "created destination namespace");
    }

    let create_table = create_table_statement(table, batch, timestamp_column);
    debug!(table = %table, statement = %create_table, "creating destination table");
    if let Err(err) = sqlx::query(&create_table).execute(&mut *tx).await {
        return Err(match sql_state(&err).as_deref() {
            Some(DUPLICATE_TABLE | UNIQUE_VIOLATION) => BootstrapError::AlreadyExists,
            _ => BootstrapError::Failed(classify(
                err,
                ErrorKind::TableCreationFailed,
                "Failed to create destination table",
                table,
            )),
        });
    }

    insert_rows(tx, &table.as_quoted_identifier(), batch)
        .await
        .map_err(|err| {
            BootstrapError::Failed(classify(
                err,
                ErrorKind::TableCreationFailed,
                "Failed to insert rows into new destination table",
                table,
            ))
        })
}

/// Renders the `create table` statement for a batch.
pub(crate) fn create_table_statement(
    table: &TableName,
    batch: &RowBatch,
    timestamp_column: Option<&str>,
) -> String {
    let mut definitions = batch
        .typed_columns()
        .map(|(name, column_type)| format!("{} {}", quote_identifier(name), column_type.sql_name()))
        .collect::<Vec<_>>();

    if let Some(timestamp_column) = timestamp_column {
        definitions.push(timestamp_column_definition(timestamp_column));
    }

    format!(
        "create table {} ({})",
        table.as_quoted_identifier(),
        definitions.join(", ")
    )
}

/// Column definition of the "last modified" column.
pub(crate) fn timestamp_column_definition(column: &str) -> String {
    format!(
        "{} timestamptz not null default now()",
        quote_identifier(column)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cell;

    fn batch() -> RowBatch {
        RowBatch::new(
            vec!["team".to_string(), "pts".to_string(), "ratio".to_string()],
            vec![vec![Cell::from("BOS"), Cell::from(100), Cell::from(0.5)]],
        )
        .unwrap()
    }

    #[test]
    fn create_statement_uses_inferred_types() {
        let table = TableName::new("nba_source", "aws_boxscores_source");

        assert_eq!(
            create_table_statement(&table, &batch(), None),
            "create table nba_source.aws_boxscores_source (team text, pts bigint, ratio double precision)"
        );
    }

    #[test]
    fn create_statement_appends_timestamp_column() {
        let table = TableName::new("nba_source", "aws_boxscores_source");

        assert_eq!(
            create_table_statement(&table, &batch(), Some("modified_at")),
            "create table nba_source.aws_boxscores_source (team text, pts bigint, ratio double precision, modified_at timestamptz not null default now())"
        );
    }
}
