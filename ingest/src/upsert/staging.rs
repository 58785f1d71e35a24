use pg_escape::quote_identifier;
use sqlx::PgConnection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, IngestError};
use crate::ingest_error;
use crate::types::{BusinessKey, RowBatch, TableName};
use crate::upsert::classify;
use crate::upsert::insert::insert_rows;
use ingest_postgres::quote_identifier_list;

const STAGING_PREFIX: &str = "ingest_staging_";

/// Number of colliding keys reported in a duplicate-key failure.
const DUPLICATE_SAMPLE_SIZE: i64 = 5;

/// A session-local temporary table holding one batch for the duration of one merge.
///
/// Created with `on commit drop`, so the table disappears with the merge transaction even when
/// the explicit drop is never reached.
#[derive(Debug)]
pub(crate) struct StagingTable {
    name: String,
}

impl StagingTable {
    /// Allocates a fresh staging name. Nothing is created until [`StagingTable::load`].
    pub(crate) fn new() -> Self {
        Self {
            name: format!("{STAGING_PREFIX}{}", Uuid::new_v4().simple()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Returns the schema-qualified quoted identifier of the staging table.
    pub(crate) fn quoted_identifier(&self) -> String {
        format!("pg_temp.{}", quote_identifier(&self.name))
    }

    pub(crate) fn create_statement(&self, batch: &RowBatch) -> String {
        let definitions = batch
            .typed_columns()
            .map(|(name, column_type)| {
                format!("{} {}", quote_identifier(name), column_type.sql_name())
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "create temporary table {} ({definitions}) on commit drop",
            quote_identifier(&self.name)
        )
    }

    /// Creates the staging table with the batch's columns and loads every row into it.
    pub(crate) async fn load(
        &self,
        conn: &mut PgConnection,
        destination: &TableName,
        batch: &RowBatch,
    ) -> Result<(), IngestError> {
        sqlx::query(&self.create_statement(batch))
            .execute(&mut *conn)
            .await
            .map_err(|err| {
                classify(
                    err,
                    ErrorKind::MergeConflict,
                    "Failed to create staging table",
                    destination,
                )
            })?;

        let rows = insert_rows(conn, &self.quoted_identifier(), batch)
            .await
            .map_err(|err| {
                classify(
                    err,
                    ErrorKind::MergeConflict,
                    "Failed to load batch into staging table",
                    destination,
                )
            })?;

        debug!(table = %destination, staging = %self.name(), rows, "loaded staging table");

        Ok(())
    }

    pub(crate) fn duplicate_keys_query(&self, business_key: &BusinessKey) -> String {
        let key_list = quote_identifier_list(business_key.columns());
        let rendered_key = business_key
            .columns()
            .iter()
            .map(|column| format!("{}::text", quote_identifier(column)))
            .collect::<Vec<_>>()
            .join(", ");
        let not_null = business_key
            .columns()
            .iter()
            .map(|column| format!("{} is not null", quote_identifier(column)))
            .collect::<Vec<_>>()
            .join(" and ");

        format!(
            "select concat_ws(', ', {rendered_key}), count(*) from {} where {not_null} group by {key_list} having count(*) > 1 limit {DUPLICATE_SAMPLE_SIZE}",
            self.quoted_identifier()
        )
    }

    /// Fails when two staged rows share the same non-null business key values.
    pub(crate) async fn ensure_unique_keys(
        &self,
        conn: &mut PgConnection,
        destination: &TableName,
        business_key: &BusinessKey,
    ) -> Result<(), IngestError> {
        let duplicates: Vec<(String, i64)> = sqlx::query_as(&self.duplicate_keys_query(business_key))
            .fetch_all(&mut *conn)
            .await
            .map_err(|err| {
                classify(
                    err,
                    ErrorKind::MergeConflict,
                    "Failed to check batch for duplicate business keys",
                    destination,
                )
            })?;

        if duplicates.is_empty() {
            return Ok(());
        }

        let sample = duplicates
            .iter()
            .map(|(key, copies)| format!("({key}) x{copies}"))
            .collect::<Vec<_>>()
            .join(", ");

        Err(ingest_error!(
            ErrorKind::MergeConflict,
            "Batch contains duplicate business keys",
            detail = format!("{destination} {business_key}: {sample}")
        ))
    }

    /// Drops the staging table inside the current transaction.
    pub(crate) async fn drop_in_transaction(
        &self,
        conn: &mut PgConnection,
        destination: &TableName,
    ) -> Result<(), IngestError> {
        sqlx::query(&self.drop_statement())
            .execute(&mut *conn)
            .await
            .map_err(|err| {
                classify(
                    err,
                    ErrorKind::QueryFailed,
                    "Failed to drop staging table",
                    destination,
                )
            })?;

        Ok(())
    }

    /// Drops the staging table outside of any transaction, logging instead of failing.
    ///
    /// Runs after a failed merge. The rollback normally removes the table already, in which
    /// case this is a no-op.
    pub(crate) async fn drop_best_effort(&self, conn: &mut PgConnection) {
        if let Err(err) = sqlx::query(&self.drop_statement())
            .execute(&mut *conn)
            .await
        {
            warn!(staging = %self.name(), error = %err, "failed to drop staging table after failure");
        }
    }

    fn drop_statement(&self) -> String {
        format!("drop table if exists {}", self.quoted_identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cell;

    #[test]
    fn staging_names_are_unique_and_valid_identifiers() {
        let first = StagingTable::new();
        let second = StagingTable::new();

        assert_ne!(first.name(), second.name());
        assert!(first.name().starts_with(STAGING_PREFIX));
        assert!(first.name().len() <= ingest_postgres::MAX_IDENTIFIER_LEN);
        assert_eq!(quote_identifier(first.name()), first.name());
    }

    #[test]
    fn create_statement_mirrors_batch_columns() {
        let staging = StagingTable::new();
        let batch = RowBatch::new(
            vec!["team".to_string(), "pts".to_string()],
            vec![vec![Cell::from("BOS"), Cell::from(105)]],
        )
        .unwrap();

        assert_eq!(
            staging.create_statement(&batch),
            format!(
                "create temporary table {} (team text, pts bigint) on commit drop",
                staging.name()
            )
        );
    }

    #[test]
    fn duplicate_query_ignores_null_keys() {
        let staging = StagingTable::new();
        let key = BusinessKey::new(["team", "game_date"]).unwrap();

        assert_eq!(
            staging.duplicate_keys_query(&key),
            format!(
                "select concat_ws(', ', team::text, game_date::text), count(*) from pg_temp.{} where team is not null and game_date is not null group by team, game_date having count(*) > 1 limit 5",
                staging.name()
            )
        );
    }
}
