//! Reading of batch files produced by the scrapers.

use std::path::Path;

use ingest::error::{ErrorKind, IngestResult};
use ingest::ingest_error;
use ingest::types::RowBatch;
use serde_json::{Map, Value};
use tracing::debug;

/// Reads a batch from a JSON array of objects or from newline-delimited JSON objects.
///
/// Blank files and blank lines are allowed; a blank file is an empty batch.
pub async fn read_batch(path: &Path) -> IngestResult<RowBatch> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
        ingest_error!(
            ErrorKind::IoError,
            "Failed to read batch file",
            detail = format!("{}: {err}", path.display()),
            source: err
        )
    })?;

    let records = parse_records(&contents).map_err(|err| {
        ingest_error!(
            ErrorKind::DeserializationError,
            "Failed to parse batch file",
            detail = format!("{}: {err}", path.display()),
            source: err
        )
    })?;
    debug!(path = %path.display(), records = records.len(), "read batch file");

    RowBatch::from_json_records(records)
}

fn parse_records(contents: &str) -> Result<Vec<Map<String, Value>>, serde_json::Error> {
    if contents.trim_start().starts_with('[') {
        return serde_json::from_str(contents);
    }

    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect()
}
