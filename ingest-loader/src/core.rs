use ingest::error::IngestError;
use ingest::feature_flags::FeatureFlags;
use ingest::notification::FailureNotifier;
use ingest::pipeline::{Pipeline, PipelineReport, TableJob, batch_unavailable};
use ingest::types::{BusinessKey, TableName};
use ingest_config::shared::{JobConfig, LoaderConfig, PgConnectionConfigWithoutSecrets};
use ingest_postgres::sqlx::connect_to_database;
use tracing::{info, warn};

use crate::batch_file::read_batch;
use crate::error::LoaderResult;
use crate::notification::SlackNotifier;

/// Runs every configured job once and reports failed tables.
///
/// Returns an aggregated error when at least one table failed. Configuration, connection and
/// feature flag errors abort the run before any table is merged.
pub async fn start_loader_with_config(config: LoaderConfig) -> LoaderResult<()> {
    info!(
        database = ?PgConnectionConfigWithoutSecrets::from(config.database.clone()),
        jobs = config.jobs.len(),
        "starting ingestion run"
    );

    let pool = connect_to_database(
        &config.database,
        config.pool.min_connections,
        config.pool.max_connections,
    )
    .await?;

    let notifier = match &config.notification {
        Some(notification) => Some(SlackNotifier::new(notification)),
        None => {
            warn!("slack notification not configured, failures will only be logged");
            None
        }
    };

    let mut pipeline = Pipeline::new(pool.clone(), notifier);
    if config.jobs.iter().any(|job| job.feature_flag.is_some()) {
        let flags_table = TableName::parse(config.feature_flags_table_or_default(), "public");
        let flags = FeatureFlags::load(&pool, &flags_table).await?;
        pipeline = pipeline.with_feature_flags(flags);
    }

    let report = run_jobs(&pipeline, &config.jobs, &config.namespace).await;

    let result = pipeline.finish(&report).await;
    pool.close().await;

    result?;
    info!("ingestion run finished without failures");

    Ok(())
}

/// Runs `jobs` in configured order. A job whose batch cannot be read is recorded as failed in
/// its place and the remaining jobs still run.
async fn run_jobs<N>(
    pipeline: &Pipeline<N>,
    jobs: &[JobConfig],
    namespace: &str,
) -> PipelineReport
where
    N: FailureNotifier,
{
    let mut report = PipelineReport::new();

    for job_config in jobs {
        let destination = destination(job_config, namespace);
        match table_job(job_config, destination.clone()).await {
            Ok(job) => pipeline.run_job(job, &mut report).await,
            Err(err) => {
                warn!(
                    table = %destination,
                    error = %err.summary(),
                    "batch unavailable, table will be reported as failed"
                );
                report.record_failure(destination, batch_unavailable(err));
            }
        }
    }
    report.log_summary();

    report
}

fn destination(job_config: &JobConfig, namespace: &str) -> TableName {
    let (schema, name) = job_config.qualified_table(namespace);
    TableName::new(schema, name)
}

async fn table_job(job_config: &JobConfig, destination: TableName) -> Result<TableJob, IngestError> {
    let business_key = BusinessKey::new(job_config.business_key.iter().cloned())?;
    let batch = read_batch(&job_config.input).await?;

    let mut job = TableJob::new(destination, batch, business_key);
    if let Some(column) = &job_config.timestamp_column {
        job = job.with_timestamp_column(column.clone());
    }
    if let Some(flag) = &job_config.feature_flag {
        job = job.with_feature_flag(flag.clone());
    }

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::Outcome;
    use ingest::notification::NoopNotifier;
    use sqlx::postgres::PgPoolOptions;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn job_config(table: &str) -> JobConfig {
        JobConfig {
            table: table.to_string(),
            business_key: vec!["team".to_string(), "date".to_string()],
            timestamp_column: Some("updated_at".to_string()),
            feature_flag: Some("boxscores".to_string()),
            input: PathBuf::from("/nonexistent/ingest/boxscores.json"),
        }
    }

    #[test]
    fn jobs_default_to_the_configured_namespace() {
        assert_eq!(
            destination(&job_config("aws_boxscores_source"), "nba_source"),
            TableName::new("nba_source", "aws_boxscores_source")
        );
        assert_eq!(
            destination(&job_config("marts.boxscores"), "nba_source"),
            TableName::new("marts", "boxscores")
        );
    }

    #[tokio::test]
    async fn unreadable_inputs_fail_only_their_job() {
        let err = table_job(
            &job_config("aws_boxscores_source"),
            TableName::new("nba_source", "aws_boxscores_source"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ingest::error::ErrorKind::IoError);
    }

    #[tokio::test]
    async fn unavailable_batches_are_reported_in_job_order() {
        let empty_input =
            std::env::temp_dir().join(format!("ingest-batch-{}.json", Uuid::new_v4()));
        tokio::fs::write(&empty_input, "[]").await.unwrap();

        let mut odds = job_config("aws_odds_source");
        odds.feature_flag = None;
        odds.input = empty_input.clone();
        let jobs = vec![
            job_config("aws_boxscores_source"),
            odds,
            job_config("aws_schedule_source"),
        ];

        // Empty batches never connect, so a lazy pool is enough.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/ingest")
            .unwrap();
        let pipeline = Pipeline::new(pool, NoopNotifier);

        let report = run_jobs(&pipeline, &jobs, "nba_source").await;
        tokio::fs::remove_file(&empty_input).await.unwrap();

        let tables = report
            .outcomes()
            .iter()
            .map(|outcome| outcome.table().name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            tables,
            vec!["aws_boxscores_source", "aws_odds_source", "aws_schedule_source"]
        );
        assert!(matches!(report.outcomes()[1], Outcome::NoOp(_)));
        assert_eq!(report.failed(), 2);
    }
}
