use pg_escape::quote_identifier;
use sqlx::{PgPool, Row};

use crate::types::{BusinessKey, Cell, RowBatch, TableName};

/// Builds a batch, panicking on invalid input.
pub fn batch(columns: &[&str], rows: Vec<Vec<Cell>>) -> RowBatch {
    RowBatch::new(columns.iter().map(|c| c.to_string()).collect(), rows)
        .expect("Failed to build test batch")
}

pub fn business_key(columns: &[&str]) -> BusinessKey {
    BusinessKey::new(columns.iter().copied()).expect("Failed to build business key")
}

/// Creates `table` with the given column definitions, e.g. `"team text, pts bigint"`.
pub async fn create_table(pool: &PgPool, table: &TableName, columns: &str) {
    sqlx::query(&format!(
        "create table {} ({columns})",
        table.as_quoted_identifier()
    ))
    .execute(pool)
    .await
    .expect("Failed to create test table");
}

/// Runs `statement` against the test database.
pub async fn execute(pool: &PgPool, statement: &str) {
    sqlx::query(statement)
        .execute(pool)
        .await
        .expect("Failed to execute test statement");
}

pub async fn count_rows(pool: &PgPool, table: &TableName) -> i64 {
    sqlx::query_scalar(&format!(
        "select count(*) from {}",
        table.as_quoted_identifier()
    ))
    .fetch_one(pool)
    .await
    .expect("Failed to count rows")
}

/// Fetches `columns` of every row as text, ordered by those columns.
///
/// Nulls are returned as `None`.
pub async fn fetch_rows(
    pool: &PgPool,
    table: &TableName,
    columns: &[&str],
) -> Vec<Vec<Option<String>>> {
    let selected = columns
        .iter()
        .map(|column| format!("{}::text", quote_identifier(column)))
        .collect::<Vec<_>>()
        .join(", ");
    let ordering = (1..=columns.len())
        .map(|position| position.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let rows = sqlx::query(&format!(
        "select {selected} from {} order by {ordering}",
        table.as_quoted_identifier()
    ))
    .fetch_all(pool)
    .await
    .expect("Failed to fetch rows");

    rows.iter()
        .map(|row| {
            (0..columns.len())
                .map(|index| row.get::<Option<String>, _>(index))
                .collect()
        })
        .collect()
}

/// Shorthand for an expected row of [`fetch_rows`] without nulls.
pub fn text_row(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|value| Some(value.to_string())).collect()
}

pub async fn table_exists(pool: &PgPool, table: &TableName) -> bool {
    sqlx::query_scalar(
        "select exists (select 1 from pg_catalog.pg_tables where schemaname = $1 and tablename = $2)",
    )
    .bind(&table.schema)
    .bind(&table.name)
    .fetch_one(pool)
    .await
    .expect("Failed to check table existence")
}

/// Returns the column lists of the unique and primary key constraints of `table`.
pub async fn unique_constraint_columns(pool: &PgPool, table: &TableName) -> Vec<Vec<String>> {
    let rows: Vec<(Vec<String>,)> = sqlx::query_as(
        r#"
        select array_agg(a.attname::text order by k.ordinality)
        from pg_catalog.pg_constraint c
        cross join lateral unnest(c.conkey) with ordinality as k(attnum, ordinality)
        join pg_catalog.pg_attribute a on a.attrelid = c.conrelid and a.attnum = k.attnum
        where c.conrelid = $1::text::regclass and c.contype in ('u', 'p')
        group by c.oid
        order by c.oid
        "#,
    )
    .bind(table.as_quoted_identifier())
    .fetch_all(pool)
    .await
    .expect("Failed to fetch constraints");

    rows.into_iter().map(|(columns,)| columns).collect()
}

/// Returns the temporary tables left in the current session's namespace.
pub async fn staging_tables(pool: &PgPool) -> Vec<String> {
    sqlx::query_scalar(
        "select tablename::text from pg_catalog.pg_tables where tablename like 'ingest_staging_%'",
    )
    .fetch_all(pool)
    .await
    .expect("Failed to list staging tables")
}
