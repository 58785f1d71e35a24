use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::Config;
use crate::shared::{PgConnectionConfig, SlackNotificationConfig, ValidationError};

/// Default table holding `(flag, is_enabled)` feature-flag rows.
const DEFAULT_FEATURE_FLAGS_TABLE: &str = "marts.feature_flags";

/// Top-level configuration of the `ingest-loader` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    pub database: PgConnectionConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Schema used for job tables that are not schema-qualified.
    pub namespace: String,
    /// Qualified name of the feature-flag table, read only when a job names a flag.
    #[serde(default)]
    pub feature_flags_table: Option<String>,
    #[serde(default)]
    pub notification: Option<SlackNotificationConfig>,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.pool.validate()?;

        if self.namespace.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "namespace".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            job.validate()?;
            if !seen.insert(job.qualified_table(&self.namespace)) {
                return Err(ValidationError::DuplicateJobTable(job.table.clone()));
            }
        }

        Ok(())
    }

    /// Returns the configured feature-flag table, falling back to `marts.feature_flags`.
    pub fn feature_flags_table_or_default(&self) -> &str {
        self.feature_flags_table
            .as_deref()
            .unwrap_or(DEFAULT_FEATURE_FLAGS_TABLE)
    }
}

impl Config for LoaderConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// Connection pool sizing for the loader.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl PoolConfig {
    pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 2;

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_connections == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "pool.max_connections".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.min_connections > self.max_connections {
            return Err(ValidationError::InvalidFieldValue {
                field: "pool.min_connections".to_string(),
                constraint: "must not exceed pool.max_connections".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_min_connections() -> u32 {
    PoolConfig::DEFAULT_MIN_CONNECTIONS
}

fn default_max_connections() -> u32 {
    PoolConfig::DEFAULT_MAX_CONNECTIONS
}

/// One destination table fed from one batch file per run.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Destination table, either `name` or `schema.name`.
    pub table: String,
    pub business_key: Vec<String>,
    /// Column stamped with `now()` whenever a merge changes a row.
    #[serde(default)]
    pub timestamp_column: Option<String>,
    /// Feature flag that must be enabled for the job to run.
    #[serde(default)]
    pub feature_flag: Option<String>,
    /// JSON array or newline-delimited JSON file holding the batch.
    pub input: PathBuf,
}

impl JobConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.table.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "jobs.table".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.business_key.is_empty() {
            return Err(ValidationError::EmptyBusinessKey(self.table.clone()));
        }

        let mut seen = HashSet::new();
        for column in &self.business_key {
            if !seen.insert(column.as_str()) {
                return Err(ValidationError::DuplicateBusinessKeyColumn {
                    table: self.table.clone(),
                    column: column.clone(),
                });
            }
        }

        Ok(())
    }

    /// Splits the job table into `(schema, name)`, using `namespace` when unqualified.
    pub fn qualified_table(&self, namespace: &str) -> (String, String) {
        match self.table.split_once('.') {
            Some((schema, name)) => (schema.to_string(), name.to_string()),
            None => (namespace.to_string(), self.table.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::TlsConfig;

    fn job(table: &str, business_key: &[&str]) -> JobConfig {
        JobConfig {
            table: table.to_string(),
            business_key: business_key.iter().map(|c| c.to_string()).collect(),
            timestamp_column: None,
            feature_flag: None,
            input: PathBuf::from("data/batch.json"),
        }
    }

    fn loader(jobs: Vec<JobConfig>) -> LoaderConfig {
        LoaderConfig {
            database: PgConnectionConfig {
                host: "localhost".to_string(),
                port: 5432,
                name: "nba".to_string(),
                username: "postgres".to_string(),
                password: None,
                tls: TlsConfig::disabled(),
            },
            pool: PoolConfig::default(),
            namespace: "nba_source".to_string(),
            feature_flags_table: None,
            notification: None,
            jobs,
        }
    }

    #[test]
    fn unqualified_tables_use_namespace() {
        let unqualified = job("aws_boxscores_source", &["team", "date"]);
        let qualified = job("staging.aws_odds_source", &["team"]);

        assert_eq!(
            unqualified.qualified_table("nba_source"),
            ("nba_source".to_string(), "aws_boxscores_source".to_string())
        );
        assert_eq!(
            qualified.qualified_table("nba_source"),
            ("staging".to_string(), "aws_odds_source".to_string())
        );
    }

    #[test]
    fn empty_business_key_is_rejected() {
        let config = loader(vec![job("aws_boxscores_source", &[])]);

        assert!(matches!(
            config.validate(),
            Err(ValidationError::EmptyBusinessKey(table)) if table == "aws_boxscores_source"
        ));
    }

    #[test]
    fn repeated_business_key_column_is_rejected() {
        let config = loader(vec![job("aws_boxscores_source", &["team", "team"])]);

        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateBusinessKeyColumn { column, .. }) if column == "team"
        ));
    }

    #[test]
    fn same_table_in_two_jobs_is_rejected() {
        let config = loader(vec![
            job("aws_odds_source", &["team"]),
            job("nba_source.aws_odds_source", &["team", "date"]),
        ]);

        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateJobTable(_))
        ));
    }

    #[test]
    fn pool_bounds_are_checked() {
        let mut config = loader(vec![job("aws_odds_source", &["team"])]);
        config.pool = PoolConfig {
            min_connections: 3,
            max_connections: 2,
        };

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "pool.min_connections"
        ));
    }

    #[test]
    fn feature_flags_table_defaults_to_marts() {
        let mut config = loader(vec![]);
        assert_eq!(config.feature_flags_table_or_default(), "marts.feature_flags");

        config.feature_flags_table = Some("ops.flags".to_string());
        assert_eq!(config.feature_flags_table_or_default(), "ops.flags");
    }
}
