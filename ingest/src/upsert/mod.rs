//! Idempotent upsert of row batches into Postgres tables.
//!
//! A call walks `START -> EXISTENCE_CHECK`, then either `CREATE` when the destination is
//! missing, or `CONSTRAINT_SYNC -> STAGE_LOAD -> MERGE -> STAGE_DROP` inside one transaction when
//! it exists. Any step may fail, in which case the transaction is rolled back, the staging table
//! is dropped and the failure is returned as [`Outcome::Failed`].

mod bootstrap;
mod constraint;
mod insert;
mod merge;
mod outcome;
mod resolver;
mod staging;

use pg_escape::quote_identifier;
use sqlx::{Connection, PgConnection, PgPool};
use tracing::{debug, error, info, warn};

use crate::bail;
use crate::error::{ErrorKind, IngestError, IngestResult, is_connection_error};
use crate::ingest_error;
use crate::types::{BusinessKey, RowBatch, TableName};

use bootstrap::BootstrapError;
use merge::MergeStatement;
use resolver::DestinationSchema;
use staging::StagingTable;

pub use outcome::{MergeFailure, MergeResult, MergeState, Outcome};

/// Create attempts per call. A create losing a race to another session falls back to the merge
/// path, and a second attempt covers a namespace created concurrently for a different table.
const MAX_CREATE_ATTEMPTS: u32 = 2;

/// Per-call configuration of the merge engine.
///
/// Carries the connection pool, the business key of the destination and the optional
/// "last modified" column. Nothing is read from global state.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pool: PgPool,
    business_key: BusinessKey,
    timestamp_column: Option<String>,
}

impl MergeContext {
    pub fn new(pool: PgPool, business_key: BusinessKey) -> Self {
        Self {
            pool,
            business_key,
            timestamp_column: None,
        }
    }

    /// Requests that `column` be stamped with `now()` whenever a row is inserted or changed.
    pub fn with_timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    pub fn business_key(&self) -> &BusinessKey {
        &self.business_key
    }

    pub fn timestamp_column(&self) -> Option<&str> {
        self.timestamp_column.as_deref()
    }
}

/// Merges `batch` into `destination`.
///
/// An empty batch returns [`Outcome::NoOp`] without touching the store. A missing destination
/// is created from the batch ([`Outcome::Created`]). An existing destination gets its
/// engine-owned uniqueness constraint redefined over the business key, after which the batch
/// is staged and upserted ([`Outcome::Merged`]). Failures are logged and returned as
/// [`Outcome::Failed`], never raised. The engine does not retry.
pub async fn merge(context: &MergeContext, batch: RowBatch, destination: &TableName) -> Outcome {
    let attempted_rows = batch.len() as u64;

    if batch.is_empty() {
        info!(table = %destination, "batch is empty, nothing to merge");
        return Outcome::NoOp(MergeResult {
            table: destination.clone(),
            rows: 0,
        });
    }

    let mut state = MergeState::Start;
    match run(context, &batch, destination, &mut state).await {
        Ok(outcome) => outcome,
        Err(error) => {
            error!(
                table = %destination,
                rows = attempted_rows,
                state = %state,
                error = %error.summary(),
                "Failed to merge batch"
            );

            Outcome::Failed(MergeFailure {
                table: destination.clone(),
                attempted_rows,
                state,
                error,
            })
        }
    }
}

async fn run(
    context: &MergeContext,
    batch: &RowBatch,
    destination: &TableName,
    state: &mut MergeState,
) -> IngestResult<Outcome> {
    validate_call(context, batch)?;

    let mut conn = context.pool.acquire().await?;

    *state = MergeState::ExistenceCheck;
    let mut destination_schema = resolver::resolve(&mut conn, destination).await?;
    let mut create_attempts = 0;

    while destination_schema.is_none() && create_attempts < MAX_CREATE_ATTEMPTS {
        info!(table = %destination, "Table {destination} not found, creating it");

        *state = MergeState::Create;
        create_attempts += 1;
        match bootstrap::create_and_load(
            &mut conn,
            destination,
            batch,
            context.timestamp_column(),
        )
        .await
        {
            Ok(rows) => {
                return Ok(Outcome::Created(MergeResult {
                    table: destination.clone(),
                    rows,
                }));
            }
            Err(BootstrapError::Failed(error)) => return Err(error),
            Err(BootstrapError::AlreadyExists) => {
                info!(
                    table = %destination,
                    "destination was created concurrently, resolving it again"
                );

                *state = MergeState::ExistenceCheck;
                destination_schema = resolver::resolve(&mut conn, destination).await?;
            }
        }
    }

    let Some(destination_schema) = destination_schema else {
        bail!(
            ErrorKind::TableCreationFailed,
            "Destination table is neither creatable nor present",
            destination.to_string()
        );
    };

    let staging = StagingTable::new();
    let result = merge_existing(
        &mut conn,
        context,
        batch,
        destination,
        &destination_schema,
        &staging,
        state,
    )
    .await;

    if result.is_err() {
        staging.drop_best_effort(&mut conn).await;
    }

    let changed = result?;
    info!(
        table = %destination,
        rows = batch.len(),
        changed,
        "merged batch into destination table"
    );

    Ok(Outcome::Merged(MergeResult {
        table: destination.clone(),
        rows: batch.len() as u64,
    }))
}

/// Runs constraint sync, staging and merge in one transaction and returns the number of rows
/// inserted or changed.
async fn merge_existing(
    conn: &mut PgConnection,
    context: &MergeContext,
    batch: &RowBatch,
    destination: &TableName,
    destination_schema: &DestinationSchema,
    staging: &StagingTable,
    state: &mut MergeState,
) -> IngestResult<u64> {
    *state = MergeState::ConstraintSync;
    let mut tx = conn.begin().await?;

    let result = merge_steps(
        &mut tx,
        context,
        batch,
        destination,
        destination_schema,
        staging,
        state,
    )
    .await;

    match result {
        Ok(changed) => {
            tx.commit().await?;
            Ok(changed)
        }
        Err(error) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(
                    table = %destination,
                    error = %rollback_err,
                    "failed to roll back merge transaction"
                );
            }

            Err(error)
        }
    }
}

async fn merge_steps(
    tx: &mut PgConnection,
    context: &MergeContext,
    batch: &RowBatch,
    destination: &TableName,
    destination_schema: &DestinationSchema,
    staging: &StagingTable,
    state: &mut MergeState,
) -> IngestResult<u64> {
    ensure_columns_exist(batch, destination, destination_schema)?;

    if let Some(timestamp_column) = context.timestamp_column()
        && !destination_schema.contains(timestamp_column)
    {
        add_timestamp_column(tx, destination, timestamp_column).await?;
    }

    constraint::redefine(tx, destination, context.business_key()).await?;

    *state = MergeState::StageLoad;
    staging.load(tx, destination, batch).await?;
    staging
        .ensure_unique_keys(tx, destination, context.business_key())
        .await?;

    *state = MergeState::Merge;
    let changed = MergeStatement {
        destination,
        destination_schema,
        staging: &staging.quoted_identifier(),
        batch,
        business_key: context.business_key(),
        timestamp_column: context.timestamp_column(),
    }
    .execute(tx)
    .await?;

    *state = MergeState::StageDrop;
    staging.drop_in_transaction(tx, destination).await?;

    Ok(changed)
}

/// Checks the producer contract before any round trip.
fn validate_call(context: &MergeContext, batch: &RowBatch) -> IngestResult<()> {
    for column in context.business_key().columns() {
        if !batch.contains_column(column) {
            bail!(
                ErrorKind::InvalidBatch,
                "Business key column missing from batch",
                format!("column `{column}`")
            );
        }
    }

    if let Some(timestamp_column) = context.timestamp_column() {
        if context.business_key().contains(timestamp_column) {
            bail!(
                ErrorKind::InvalidBatch,
                "Timestamp column cannot be part of the business key",
                format!("column `{timestamp_column}`")
            );
        }
        if batch.contains_column(timestamp_column) {
            bail!(
                ErrorKind::InvalidBatch,
                "Timestamp column is managed by the merge and cannot be supplied by the batch",
                format!("column `{timestamp_column}`")
            );
        }
    }

    Ok(())
}

fn ensure_columns_exist(
    batch: &RowBatch,
    destination: &TableName,
    destination_schema: &DestinationSchema,
) -> IngestResult<()> {
    let missing = batch
        .columns()
        .iter()
        .filter(|column| !destination_schema.contains(column))
        .map(String::as_str)
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        bail!(
            ErrorKind::MergeConflict,
            "Batch columns missing from destination table",
            format!("{destination} lacks {}", missing.join(", "))
        );
    }

    Ok(())
}

async fn add_timestamp_column(
    conn: &mut PgConnection,
    destination: &TableName,
    timestamp_column: &str,
) -> IngestResult<()> {
    let statement = format!(
        "alter table {} add column if not exists {}",
        destination.as_quoted_identifier(),
        bootstrap::timestamp_column_definition(timestamp_column)
    );

    sqlx::query(&statement)
        .execute(&mut *conn)
        .await
        .map_err(|err| {
            classify(
                err,
                ErrorKind::QueryFailed,
                "Failed to add timestamp column",
                destination,
            )
        })?;

    debug!(
        table = %destination,
        column = %quote_identifier(timestamp_column),
        "added timestamp column to destination table"
    );

    Ok(())
}

/// Wraps a store error with a merge classification, unless it is a connection failure.
pub(crate) fn classify(
    err: sqlx::Error,
    kind: ErrorKind,
    description: &'static str,
    table: &TableName,
) -> IngestError {
    if is_connection_error(&err) {
        return ingest_error!(
            ErrorKind::ConnectionFailed,
            "Database connection failed",
            detail = format!("{table}: {err}"),
            source: err
        );
    }

    ingest_error!(kind, description, detail = format!("{table}: {err}"), source: err)
}

/// Returns the SQLSTATE code of a database error.
pub(crate) fn sql_state(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db_error| db_error.code())
        .map(|code| code.into_owned())
}

#[cfg(test)]
mod tests {
    use sqlx::postgres::PgPoolOptions;

    use super::*;
    use crate::types::Cell;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/ingest")
            .unwrap()
    }

    fn batch() -> RowBatch {
        RowBatch::new(
            vec!["team".to_string(), "pts".to_string()],
            vec![vec![Cell::from("BOS"), Cell::from(105)]],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn missing_key_column_is_an_invalid_batch() {
        let context = MergeContext::new(lazy_pool(), BusinessKey::new(["team", "date"]).unwrap());

        let err = validate_call(&context, &batch()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidBatch);
        assert_eq!(err.detail(), Some("column `date`"));
    }

    #[tokio::test]
    async fn timestamp_column_must_not_be_supplied() {
        let context = MergeContext::new(lazy_pool(), BusinessKey::new(["team"]).unwrap())
            .with_timestamp_column("pts");

        let err = validate_call(&context, &batch()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidBatch);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op_without_connecting() {
        let context = MergeContext::new(lazy_pool(), BusinessKey::new(["team"]).unwrap());
        let destination = TableName::new("nba_source", "aws_odds_source");

        let outcome = merge(&context, RowBatch::empty(), &destination).await;

        assert!(matches!(
            outcome,
            Outcome::NoOp(MergeResult { rows: 0, .. })
        ));
    }

    #[test]
    fn unknown_batch_columns_are_merge_conflicts() {
        let destination = TableName::new("nba_source", "aws_fake_data_source");
        let destination_schema = DestinationSchema::new(vec![resolver::DestinationColumn {
            name: "team".to_string(),
            data_type: "text".to_string(),
        }]);

        let err = ensure_columns_exist(&batch(), &destination, &destination_schema).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MergeConflict);
        assert_eq!(err.detail(), Some("nba_source.aws_fake_data_source lacks pts"));
    }
}
