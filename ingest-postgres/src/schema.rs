use std::fmt;

use pg_escape::quote_identifier;

/// Maximum length in bytes of a Postgres identifier.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Fully qualified Postgres table name with schema and table components.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct TableName {
    /// The schema (namespace) containing the table.
    pub schema: String,
    /// The name of the table within the schema.
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parses `schema.name`, or `name` qualified with `default_schema`.
    pub fn parse(value: &str, default_schema: &str) -> TableName {
        match value.split_once('.') {
            Some((schema, name)) => TableName::new(schema, name),
            None => TableName::new(default_schema, value),
        }
    }

    /// Returns the table name as a quoted Postgres identifier, e.g. `"nba_source"."t"`.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }

    /// Returns the quoted schema identifier.
    pub fn quoted_schema(&self) -> String {
        quote_identifier(&self.schema).into_owned()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{0}.{1}", self.schema, self.name))
    }
}

/// Quotes each identifier and joins them with `, `.
pub fn quote_identifier_list<S: AsRef<str>>(identifiers: &[S]) -> String {
    identifiers
        .iter()
        .map(|identifier| quote_identifier(identifier.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_schema_and_name_separately() {
        let table = TableName::new("nba_source", "Odds Source");

        assert_eq!(table.as_quoted_identifier(), r#"nba_source."Odds Source""#);
        assert_eq!(table.to_string(), "nba_source.Odds Source");
    }

    #[test]
    fn parse_uses_default_schema_when_unqualified() {
        assert_eq!(
            TableName::parse("aws_boxscores_source", "nba_source"),
            TableName::new("nba_source", "aws_boxscores_source")
        );
        assert_eq!(
            TableName::parse("marts.feature_flags", "nba_source"),
            TableName::new("marts", "feature_flags")
        );
    }

    #[test]
    fn identifier_lists_quote_mixed_case() {
        assert_eq!(
            quote_identifier_list(&["team", "season", "Pts"]),
            r#"team, season, "Pts""#
        );
    }
}
