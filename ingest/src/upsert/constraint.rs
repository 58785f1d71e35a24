use pg_escape::quote_identifier;
use sha2::{Digest, Sha256};
use sqlx::PgConnection;
use tracing::debug;

use crate::error::{ErrorKind, IngestError};
use crate::ingest_error;
use crate::types::{BusinessKey, TableName};
use crate::upsert::{classify, sql_state};
use ingest_postgres::{MAX_IDENTIFIER_LEN, quote_identifier_list};

/// Suffix of the uniqueness constraint owned by the merge engine.
const CONSTRAINT_SUFFIX: &str = "_ingest_key";

/// SQLSTATE raised when existing rows violate a new unique constraint.
const UNIQUE_VIOLATION: &str = "23505";

/// Hex digits of the table name digest appended to truncated names.
const DIGEST_LEN: usize = 8;

/// Returns the name of the engine-owned constraint of `table`.
///
/// Names that would exceed a Postgres identifier keep a prefix of the table name cut on a
/// character boundary, followed by a digest of the full name. Tables sharing that prefix still
/// get distinct constraints.
pub(crate) fn constraint_name(table: &TableName) -> String {
    if table.name.len() + CONSTRAINT_SUFFIX.len() <= MAX_IDENTIFIER_LEN {
        return format!("{}{CONSTRAINT_SUFFIX}", table.name);
    }

    let digest = format!("{:x}", Sha256::digest(table.name.as_bytes()));
    let budget = MAX_IDENTIFIER_LEN - CONSTRAINT_SUFFIX.len() - DIGEST_LEN - 1;
    let mut end = budget;
    while !table.name.is_char_boundary(end) {
        end -= 1;
    }

    format!(
        "{}_{}{CONSTRAINT_SUFFIX}",
        &table.name[..end],
        &digest[..DIGEST_LEN]
    )
}

pub(crate) fn drop_constraint_statement(table: &TableName) -> String {
    format!(
        "alter table {} drop constraint if exists {}",
        table.as_quoted_identifier(),
        quote_identifier(&constraint_name(table))
    )
}

pub(crate) fn add_constraint_statement(table: &TableName, business_key: &BusinessKey) -> String {
    format!(
        "alter table {} add constraint {} unique ({})",
        table.as_quoted_identifier(),
        quote_identifier(&constraint_name(table)),
        quote_identifier_list(business_key.columns())
    )
}

/// Replaces the engine-owned uniqueness constraint with one over exactly `business_key`.
///
/// Runs unconditionally on every merge so that a key changed between pipeline revisions is
/// honoured. Other constraints of the table are left untouched. Must run inside the merge
/// transaction so a later failure restores the previous constraint.
pub(crate) async fn redefine(
    conn: &mut PgConnection,
    table: &TableName,
    business_key: &BusinessKey,
) -> Result<(), IngestError> {
    sqlx::query(&drop_constraint_statement(table))
        .execute(&mut *conn)
        .await
        .map_err(|err| {
            classify(
                err,
                ErrorKind::ConstraintDefinitionFailed,
                "Failed to drop business key constraint",
                table,
            )
        })?;

    if let Err(err) = sqlx::query(&add_constraint_statement(table, business_key))
        .execute(&mut *conn)
        .await
    {
        if sql_state(&err).as_deref() == Some(UNIQUE_VIOLATION) {
            return Err(ingest_error!(
                ErrorKind::ConstraintDefinitionFailed,
                "Existing rows violate the business key",
                detail = format!("{table} has duplicate values for {business_key}: {err}"),
                source: err
            ));
        }

        return Err(classify(
            err,
            ErrorKind::ConstraintDefinitionFailed,
            "Failed to add business key constraint",
            table,
        ));
    }

    debug!(table = %table, business_key = %business_key, "redefined business key constraint");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_statements_target_engine_owned_name() {
        let table = TableName::new("nba_source", "aws_boxscores_source");
        let key = BusinessKey::new(["team", "game_date"]).unwrap();

        assert_eq!(
            drop_constraint_statement(&table),
            "alter table nba_source.aws_boxscores_source drop constraint if exists aws_boxscores_source_ingest_key"
        );
        assert_eq!(
            add_constraint_statement(&table, &key),
            "alter table nba_source.aws_boxscores_source add constraint aws_boxscores_source_ingest_key unique (team, game_date)"
        );
    }

    #[test]
    fn long_names_are_truncated_to_identifier_limit() {
        let table = TableName::new("nba_source", "a".repeat(80));
        let name = constraint_name(&table);

        assert_eq!(name.len(), MAX_IDENTIFIER_LEN);
        assert!(name.ends_with(CONSTRAINT_SUFFIX));
        assert_eq!(constraint_name(&table), name);
    }

    #[test]
    fn truncated_names_stay_distinct_for_a_shared_prefix() {
        let prefix = "aws_player_tracking_catch_and_shoot_shooting_splits_by_game";
        let home = TableName::new("nba_source", format!("{prefix}_home"));
        let away = TableName::new("nba_source", format!("{prefix}_away"));

        let home_name = constraint_name(&home);
        let away_name = constraint_name(&away);

        assert_ne!(home_name, away_name);
        assert!(home_name.len() <= MAX_IDENTIFIER_LEN);
        assert!(away_name.len() <= MAX_IDENTIFIER_LEN);
        assert!(home_name.starts_with("aws_player_tracking"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let table = TableName::new("nba_source", "é".repeat(40));
        let name = constraint_name(&table);

        assert!(name.len() <= MAX_IDENTIFIER_LEN);
        assert!(name.ends_with(CONSTRAINT_SUFFIX));
    }
}
