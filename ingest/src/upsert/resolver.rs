use sqlx::PgConnection;
use tracing::debug;

use crate::types::TableName;

/// A column of an existing destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationColumn {
    pub name: String,
    /// Declared type without its modifier, e.g. `character varying` for `varchar(20)`.
    ///
    /// Staged values are cast to this type, leaving length and precision checks to the
    /// assignment into the destination. An explicit cast to `varchar(3)` would silently truncate.
    pub data_type: String,
}

/// Columns of an existing destination table, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSchema {
    columns: Vec<DestinationColumn>,
}

impl DestinationSchema {
    pub fn new(columns: Vec<DestinationColumn>) -> Self {
        Self { columns }
    }

    pub fn column(&self, name: &str) -> Option<&DestinationColumn> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// Looks up the destination table, returning `None` when it does not exist.
///
/// Only ordinary and partitioned tables count. Views or foreign tables with the same name are
/// reported as missing, and the subsequent create fails with a clear error.
pub(crate) async fn resolve(
    conn: &mut PgConnection,
    table: &TableName,
) -> Result<Option<DestinationSchema>, sqlx::Error> {
    let exists: bool = sqlx::query_scalar(
        r#"
        select exists (
            select 1
            from pg_catalog.pg_class c
            join pg_catalog.pg_namespace n on n.oid = c.relnamespace
            where n.nspname = $1
              and c.relname = $2
              and c.relkind in ('r', 'p')
        )
        "#,
    )
    .bind(&table.schema)
    .bind(&table.name)
    .fetch_one(&mut *conn)
    .await?;

    if !exists {
        debug!(table = %table, "destination table does not exist");
        return Ok(None);
    }

    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        select a.attname::text, pg_catalog.format_type(a.atttypid, -1)
        from pg_catalog.pg_attribute a
        join pg_catalog.pg_class c on c.oid = a.attrelid
        join pg_catalog.pg_namespace n on n.oid = c.relnamespace
        where n.nspname = $1
          and c.relname = $2
          and a.attnum > 0
          and not a.attisdropped
        order by a.attnum
        "#,
    )
    .bind(&table.schema)
    .bind(&table.name)
    .fetch_all(&mut *conn)
    .await?;

    let columns = rows
        .into_iter()
        .map(|(name, data_type)| DestinationColumn { name, data_type })
        .collect::<Vec<_>>();

    debug!(table = %table, columns = columns.len(), "resolved destination table");

    Ok(Some(DestinationSchema::new(columns)))
}
