use pg_escape::quote_identifier;
use sqlx::PgConnection;
use tracing::debug;

use crate::error::{ErrorKind, IngestError};
use crate::types::{BusinessKey, RowBatch, TableName};
use crate::upsert::classify;
use crate::upsert::resolver::DestinationSchema;
use ingest_postgres::quote_identifier_list;

/// Destination types without an equality operator, compared through their text form.
const TEXT_COMPARED_TYPES: &[&str] = &["json", "xml"];

/// Everything needed to render the merge statement of one call.
pub(crate) struct MergeStatement<'a> {
    pub destination: &'a TableName,
    pub destination_schema: &'a DestinationSchema,
    pub staging: &'a str,
    pub batch: &'a RowBatch,
    pub business_key: &'a BusinessKey,
    pub timestamp_column: Option<&'a str>,
}

impl MergeStatement<'_> {
    /// Renders `insert ... select ... on conflict ... do update`.
    ///
    /// Staged values are cast to the destination's declared types, without modifiers. Existing
    /// rows are only updated when a non-key value differs, so re-merging an identical batch
    /// writes nothing and leaves the "last modified" column untouched. Without non-key columns
    /// there is nothing to update and conflicting rows are skipped.
    pub(crate) fn render(&self) -> String {
        let columns = self.batch.columns();

        let mut insert_columns = columns
            .iter()
            .map(|column| quote_identifier(column).into_owned())
            .collect::<Vec<_>>();
        let mut select_list = columns
            .iter()
            .map(|column| {
                format!(
                    "cast(src.{} as {})",
                    quote_identifier(column),
                    self.destination_type(column)
                )
            })
            .collect::<Vec<_>>();

        if let Some(timestamp_column) = self.timestamp_column {
            insert_columns.push(quote_identifier(timestamp_column).into_owned());
            select_list.push("now()".to_string());
        }

        let non_key_columns = columns
            .iter()
            .filter(|column| !self.business_key.contains(column))
            .collect::<Vec<_>>();

        let conflict_action = if non_key_columns.is_empty() {
            "do nothing".to_string()
        } else {
            let mut assignments = non_key_columns
                .iter()
                .map(|column| {
                    let column = quote_identifier(column);
                    format!("{column} = excluded.{column}")
                })
                .collect::<Vec<_>>();
            if let Some(timestamp_column) = self.timestamp_column {
                assignments.push(format!("{} = now()", quote_identifier(timestamp_column)));
            }

            let current = non_key_columns
                .iter()
                .map(|column| self.comparable("dst", column))
                .collect::<Vec<_>>()
                .join(", ");
            let incoming = non_key_columns
                .iter()
                .map(|column| self.comparable("excluded", column))
                .collect::<Vec<_>>()
                .join(", ");

            format!(
                "do update set {} where ({current}) is distinct from ({incoming})",
                assignments.join(", ")
            )
        };

        format!(
            "insert into {} as dst ({}) select {} from {} as src on conflict ({}) {conflict_action}",
            self.destination.as_quoted_identifier(),
            insert_columns.join(", "),
            select_list.join(", "),
            self.staging,
            quote_identifier_list(self.business_key.columns()),
        )
    }

    fn destination_type(&self, column: &str) -> &str {
        self.destination_schema
            .column(column)
            .map(|column| column.data_type.as_str())
            .unwrap_or("text")
    }

    fn comparable(&self, alias: &str, column: &str) -> String {
        let expression = format!("{alias}.{}", quote_identifier(column));
        if TEXT_COMPARED_TYPES.contains(&self.destination_type(column)) {
            format!("{expression}::text")
        } else {
            expression
        }
    }

    /// Runs the merge statement, returning the number of rows inserted or changed.
    pub(crate) async fn execute(&self, conn: &mut PgConnection) -> Result<u64, IngestError> {
        let statement = self.render();
        debug!(table = %self.destination, statement = %statement, "merging staged batch");

        let changed = sqlx::query(&statement)
            .execute(&mut *conn)
            .await
            .map_err(|err| {
                classify(
                    err,
                    ErrorKind::MergeConflict,
                    "Failed to merge batch into destination table",
                    self.destination,
                )
            })?
            .rows_affected();

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Cell;
    use crate::upsert::resolver::DestinationColumn;

    fn schema(columns: &[(&str, &str)]) -> DestinationSchema {
        DestinationSchema::new(
            columns
                .iter()
                .map(|(name, data_type)| DestinationColumn {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                })
                .collect(),
        )
    }

    fn batch(columns: &[&str]) -> RowBatch {
        RowBatch::new(
            columns.iter().map(|column| column.to_string()).collect(),
            vec![columns.iter().map(|_| Cell::from("x")).collect()],
        )
        .unwrap()
    }

    #[test]
    fn updates_non_key_columns_only_when_changed() {
        let destination = TableName::new("nba_source", "scores");
        let destination_schema = schema(&[("team", "text"), ("game_date", "date"), ("pts", "bigint")]);
        let batch = batch(&["team", "game_date", "pts"]);
        let business_key = BusinessKey::new(["team", "game_date"]).unwrap();

        let statement = MergeStatement {
            destination: &destination,
            destination_schema: &destination_schema,
            staging: "pg_temp.ingest_staging_1",
            batch: &batch,
            business_key: &business_key,
            timestamp_column: None,
        };

        assert_eq!(
            statement.render(),
            "insert into nba_source.scores as dst (team, game_date, pts) \
             select cast(src.team as text), cast(src.game_date as date), cast(src.pts as bigint) \
             from pg_temp.ingest_staging_1 as src on conflict (team, game_date) \
             do update set pts = excluded.pts where (dst.pts) is distinct from (excluded.pts)"
        );
    }

    #[test]
    fn stamps_timestamp_column_on_insert_and_change() {
        let destination = TableName::new("nba_source", "scores");
        let destination_schema = schema(&[
            ("team", "text"),
            ("pts", "bigint"),
            ("payload", "json"),
            ("modified_at", "timestamp with time zone"),
        ]);
        let batch = batch(&["team", "pts", "payload"]);
        let business_key = BusinessKey::new(["team"]).unwrap();

        let statement = MergeStatement {
            destination: &destination,
            destination_schema: &destination_schema,
            staging: "pg_temp.ingest_staging_1",
            batch: &batch,
            business_key: &business_key,
            timestamp_column: Some("modified_at"),
        };

        assert_eq!(
            statement.render(),
            "insert into nba_source.scores as dst (team, pts, payload, modified_at) \
             select cast(src.team as text), cast(src.pts as bigint), cast(src.payload as json), now() \
             from pg_temp.ingest_staging_1 as src on conflict (team) \
             do update set pts = excluded.pts, payload = excluded.payload, modified_at = now() \
             where (dst.pts, dst.payload::text) is distinct from (excluded.pts, excluded.payload::text)"
        );
    }

    #[test]
    fn key_only_batches_skip_conflicts() {
        let destination = TableName::new("nba_source", "teams");
        let destination_schema = schema(&[("team", "text")]);
        let batch = batch(&["team"]);
        let business_key = BusinessKey::new(["team"]).unwrap();

        let statement = MergeStatement {
            destination: &destination,
            destination_schema: &destination_schema,
            staging: "pg_temp.ingest_staging_1",
            batch: &batch,
            business_key: &business_key,
            timestamp_column: None,
        };

        assert!(statement.render().ends_with("on conflict (team) do nothing"));
    }
}
