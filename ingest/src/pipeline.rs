//! Sequential orchestration of merge calls over the tables of one ingestion run.
//!
//! Every table is merged independently: a failed table is recorded in the [`PipelineReport`]
//! and the run moves on. Once all tables ran, [`Pipeline::finish`] hands the failures to the
//! [`FailureNotifier`] in one batch.

use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::{ErrorKind, IngestError, IngestResult};
use crate::feature_flags::FeatureFlags;
use crate::ingest_error;
use crate::notification::FailureNotifier;
use crate::types::{BusinessKey, RowBatch, TableName};
use crate::upsert::{self, MergeContext, MergeFailure, MergeState, Outcome};

/// One destination table and the batch to merge into it.
#[derive(Debug, Clone)]
pub struct TableJob {
    pub destination: TableName,
    pub batch: RowBatch,
    pub business_key: BusinessKey,
    pub timestamp_column: Option<String>,
    /// Flag that must be enabled for the job to run.
    pub feature_flag: Option<String>,
}

impl TableJob {
    pub fn new(destination: TableName, batch: RowBatch, business_key: BusinessKey) -> Self {
        Self {
            destination,
            batch,
            business_key,
            timestamp_column: None,
            feature_flag: None,
        }
    }

    pub fn with_timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = Some(column.into());
        self
    }

    pub fn with_feature_flag(mut self, flag: impl Into<String>) -> Self {
        self.feature_flag = Some(flag.into());
        self
    }
}

/// Table that was not merged because its feature flag is off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTable {
    pub table: TableName,
    pub feature_flag: String,
}

/// Everything that happened during one run.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    outcomes: Vec<Outcome>,
    skipped: Vec<SkippedTable>,
}

impl PipelineReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    pub fn skip(&mut self, table: TableName, feature_flag: impl Into<String>) {
        self.skipped.push(SkippedTable {
            table,
            feature_flag: feature_flag.into(),
        });
    }

    /// Records a table that failed before reaching the merge engine, e.g. an unreadable
    /// batch file.
    pub fn record_failure(&mut self, table: TableName, error: IngestError) {
        self.outcomes.push(Outcome::Failed(MergeFailure {
            table,
            attempted_rows: 0,
            state: MergeState::Start,
            error,
        }));
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn skipped(&self) -> &[SkippedTable] {
        &self.skipped
    }

    pub fn failures(&self) -> impl Iterator<Item = &MergeFailure> {
        self.outcomes.iter().filter_map(Outcome::failure)
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(Outcome::is_failed)
    }

    /// Number of tables that were created or merged, no-ops included.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|outcome| !outcome.is_failed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_failed()).count()
    }

    pub fn log_summary(&self) {
        info!(
            succeeded = self.succeeded(),
            failed = self.failed(),
            skipped = self.skipped().len(),
            "pipeline run finished"
        );
    }
}

/// Runs table jobs against one pool and reports failures through `N`.
#[derive(Debug, Clone)]
pub struct Pipeline<N> {
    pool: PgPool,
    feature_flags: Option<FeatureFlags>,
    notifier: N,
}

impl<N> Pipeline<N>
where
    N: FailureNotifier,
{
    pub fn new(pool: PgPool, notifier: N) -> Self {
        Self {
            pool,
            feature_flags: None,
            notifier,
        }
    }

    /// Gates jobs naming a feature flag on `feature_flags`. Without flags every job runs.
    pub fn with_feature_flags(mut self, feature_flags: FeatureFlags) -> Self {
        self.feature_flags = Some(feature_flags);
        self
    }

    /// Returns the flag disabling `job`, if any.
    pub fn gate<'a>(&self, job_flag: Option<&'a str>) -> Option<&'a str> {
        let flag = job_flag?;
        let feature_flags = self.feature_flags.as_ref()?;

        (!feature_flags.is_enabled(flag)).then_some(flag)
    }

    /// Merges every job in order.
    pub async fn run(&self, jobs: Vec<TableJob>) -> PipelineReport {
        let mut report = PipelineReport::new();
        for job in jobs {
            self.run_job(job, &mut report).await;
        }
        report.log_summary();

        report
    }

    /// Merges one job, or skips it when its feature flag is disabled, and records the result.
    pub async fn run_job(&self, job: TableJob, report: &mut PipelineReport) {
        if let Some(flag) = self.gate(job.feature_flag.as_deref()) {
            info!(
                table = %job.destination,
                feature_flag = flag,
                "feature flag `{flag}` is disabled, skipping table {}",
                job.destination
            );
            report.skip(job.destination, flag);
            return;
        }

        let mut context = MergeContext::new(self.pool.clone(), job.business_key);
        if let Some(column) = job.timestamp_column {
            context = context.with_timestamp_column(column);
        }

        let outcome = upsert::merge(&context, job.batch, &job.destination).await;
        info!(
            table = %job.destination,
            outcome = outcome.label(),
            rows = outcome.rows(),
            "table job finished"
        );

        report.record(outcome);
    }

    /// Notifies about the failures of `report` and returns them as one aggregated error.
    ///
    /// The notifier is called only when something failed. A notification error is logged and
    /// does not replace the table failures.
    pub async fn finish(&self, report: &PipelineReport) -> IngestResult<()> {
        let failures: Vec<MergeFailure> = report.failures().cloned().collect();
        if failures.is_empty() {
            return Ok(());
        }

        if let Err(err) = self.notifier.notify(&failures).await {
            warn!(error = %err.summary(), "failed to deliver failure notification");
        }

        let errors: Vec<IngestError> = failures
            .into_iter()
            .map(|failure| {
                let detail = failure.to_string();
                ingest_error!(
                    failure.error.kind(),
                    "Table ingestion failed",
                    detail = detail,
                    source: failure.error
                )
            })
            .collect();

        Err(errors.into())
    }
}

/// Error recorded for a table whose batch could not be produced.
pub fn batch_unavailable(error: IngestError) -> IngestError {
    if error.kind() == ErrorKind::InvalidBatch {
        return error;
    }

    ingest_error!(
        ErrorKind::InvalidBatch,
        "Batch could not be read",
        detail = error.summary(),
        source: error
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NoopNotifier;
    use crate::upsert::MergeResult;
    use sqlx::postgres::PgPoolOptions;

    fn pipeline() -> Pipeline<NoopNotifier> {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/ingest")
            .unwrap();

        Pipeline::new(pool, NoopNotifier)
    }

    fn table(name: &str) -> TableName {
        TableName::new("nba_source", name)
    }

    #[tokio::test]
    async fn jobs_without_flags_are_never_gated() {
        let pipeline = pipeline().with_feature_flags(FeatureFlags::new([("season", false)]));

        assert_eq!(pipeline.gate(None), None);
        assert_eq!(pipeline.gate(Some("season")), Some("season"));
        assert_eq!(pipeline.gate(Some("missing")), Some("missing"));
    }

    #[tokio::test]
    async fn without_loaded_flags_every_job_runs() {
        assert_eq!(pipeline().gate(Some("season")), None);
    }

    #[tokio::test]
    async fn disabled_jobs_are_skipped_before_merging() {
        let pipeline = pipeline().with_feature_flags(FeatureFlags::new([("odds", false)]));
        let job = TableJob::new(
            table("aws_odds_source"),
            RowBatch::empty(),
            BusinessKey::new(["team"]).unwrap(),
        )
        .with_feature_flag("odds");

        let report = pipeline.run(vec![job]).await;

        assert!(report.outcomes().is_empty());
        assert_eq!(
            report.skipped(),
            &[SkippedTable {
                table: table("aws_odds_source"),
                feature_flag: "odds".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn finish_aggregates_every_failure() {
        let mut report = PipelineReport::new();
        report.record(Outcome::Merged(MergeResult {
            table: table("aws_boxscores_source"),
            rows: 3,
        }));
        report.record_failure(
            table("aws_odds_source"),
            ingest_error!(ErrorKind::DeserializationError, "JSON deserialization failed"),
        );
        report.record_failure(
            table("aws_injury_data_source"),
            ingest_error!(ErrorKind::ConnectionFailed, "Database connection failed"),
        );

        let err = pipeline().finish(&report).await.unwrap_err();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::DeserializationError, ErrorKind::ConnectionFailed]
        );
    }

    #[tokio::test]
    async fn finish_succeeds_without_failures() {
        let mut report = PipelineReport::new();
        report.record(Outcome::NoOp(MergeResult {
            table: table("aws_odds_source"),
            rows: 0,
        }));

        assert!(pipeline().finish(&report).await.is_ok());
    }

    #[test]
    fn unreadable_batches_are_invalid_batches() {
        let err = batch_unavailable(ingest_error!(ErrorKind::IoError, "I/O operation failed"));

        assert_eq!(err.kind(), ErrorKind::InvalidBatch);
    }
}
