use std::collections::HashSet;
use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, IngestResult};

/// Ordered, non-empty set of columns whose combined values identify a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BusinessKey {
    columns: Vec<String>,
}

impl BusinessKey {
    pub fn new<I, S>(columns: I) -> IngestResult<BusinessKey>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();

        if columns.is_empty() {
            bail!(
                ErrorKind::InvalidBatch,
                "Business key must name at least one column"
            );
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                bail!(
                    ErrorKind::InvalidBatch,
                    "Business key repeats a column",
                    format!("column `{column}`")
                );
            }
        }

        Ok(BusinessKey { columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|key| key == column)
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.columns.join(", "))
    }
}
