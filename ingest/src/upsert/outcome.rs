use std::fmt;

use crate::error::IngestError;
use crate::types::TableName;

/// Step of a merge call, reported with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Start,
    ExistenceCheck,
    Create,
    ConstraintSync,
    StageLoad,
    Merge,
    StageDrop,
}

impl MergeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeState::Start => "START",
            MergeState::ExistenceCheck => "EXISTENCE_CHECK",
            MergeState::Create => "CREATE",
            MergeState::ConstraintSync => "CONSTRAINT_SYNC",
            MergeState::StageLoad => "STAGE_LOAD",
            MergeState::Merge => "MERGE",
            MergeState::StageDrop => "STAGE_DROP",
        }
    }
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful result of a merge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub table: TableName,
    /// Rows of the input batch. Rows left unchanged by the merge are counted too.
    pub rows: u64,
}

/// Structured record of a failed merge call.
#[derive(Debug, Clone)]
pub struct MergeFailure {
    pub table: TableName,
    pub attempted_rows: u64,
    /// Step that was running when the failure occurred.
    pub state: MergeState,
    pub error: IngestError,
}

impl fmt::Display for MergeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} rows, failed during {}): {}",
            self.table,
            self.attempted_rows,
            self.state,
            self.error.summary()
        )
    }
}

/// Outcome of one merge call.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The batch had no rows and the destination was not touched.
    NoOp(MergeResult),
    /// The destination did not exist and was created from the batch.
    Created(MergeResult),
    /// The batch was merged into the existing destination.
    Merged(MergeResult),
    Failed(MergeFailure),
}

impl Outcome {
    pub fn table(&self) -> &TableName {
        match self {
            Outcome::NoOp(result) | Outcome::Created(result) | Outcome::Merged(result) => {
                &result.table
            }
            Outcome::Failed(failure) => &failure.table,
        }
    }

    /// Returns the rows reported by a successful call, or `None` for failures.
    pub fn rows(&self) -> Option<u64> {
        match self {
            Outcome::NoOp(result) | Outcome::Created(result) | Outcome::Merged(result) => {
                Some(result.rows)
            }
            Outcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&MergeFailure> {
        match self {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Short label of the outcome variant for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::NoOp(_) => "no_op",
            Outcome::Created(_) => "created",
            Outcome::Merged(_) => "merged",
            Outcome::Failed(_) => "failed",
        }
    }
}
