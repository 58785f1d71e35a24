//! Feature flags deciding which tables a pipeline run ingests.

use std::collections::HashMap;

use sqlx::PgPool;
use tracing::info;

use crate::error::IngestResult;
use crate::types::TableName;

/// Snapshot of `(flag, is_enabled)` rows read once per run.
///
/// A flag absent from the table counts as disabled.
#[derive(Debug, Clone, Default)]
pub struct FeatureFlags {
    flags: HashMap<String, bool>,
}

impl FeatureFlags {
    /// Creates flags from `(name, enabled)` pairs.
    pub fn new<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        Self {
            flags: flags
                .into_iter()
                .map(|(flag, enabled)| (flag.into(), enabled))
                .collect(),
        }
    }

    /// Reads every flag of `table`.
    ///
    /// The table needs a `flag` column and an `is_enabled` column holding either a boolean or
    /// an integer where `1` means enabled.
    pub async fn load(pool: &PgPool, table: &TableName) -> IngestResult<Self> {
        let rows: Vec<(String, i32)> = sqlx::query_as(&format!(
            "select flag::text, is_enabled::int from {}",
            table.as_quoted_identifier()
        ))
        .fetch_all(pool)
        .await?;

        let flags = FeatureFlags::new(rows.into_iter().map(|(flag, enabled)| (flag, enabled == 1)));
        info!(table = %table, flags = flags.len(), "loaded feature flags");

        Ok(flags)
    }

    pub fn is_enabled(&self, flag: &str) -> bool {
        self.flags.get(flag).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}
