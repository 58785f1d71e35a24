#![cfg(feature = "test-utils")]

use ingest::error::ErrorKind;
use ingest::feature_flags::FeatureFlags;
use ingest::pipeline::{Pipeline, TableJob};
use ingest::test_utils::database::{spawn_database, test_table_name};
use ingest::test_utils::notifier::RecordingNotifier;
use ingest::test_utils::table::{
    batch, business_key, count_rows, create_table, execute, fetch_rows, table_exists, text_row,
};
use ingest::types::{Cell, RowBatch};
use ingest::{MergeState, Outcome};
use ingest_telemetry::tracing::init_test_tracing;

fn odds(rows: &[(&str, i64)]) -> RowBatch {
    batch(
        &["team", "moneyline"],
        rows.iter()
            .map(|(team, moneyline)| vec![Cell::from(*team), Cell::from(*moneyline)])
            .collect(),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn a_failing_table_does_not_stop_the_others() {
    init_test_tracing();
    let database = spawn_database().await;

    // Two rows share a team, so a business key on `team` cannot be declared.
    let broken = test_table_name("aws_injury_data_source");
    create_table(&database.pool, &broken, "team text, moneyline bigint").await;
    execute(
        &database.pool,
        &format!(
            "insert into {} values ('BOS', 1), ('BOS', 2)",
            broken.as_quoted_identifier()
        ),
    )
    .await;
    let healthy = test_table_name("aws_odds_source");

    let notifier = RecordingNotifier::new();
    let pipeline = Pipeline::new(database.pool.clone(), notifier.clone());
    let report = pipeline
        .run(vec![
            TableJob::new(broken.clone(), odds(&[("NYK", 3)]), business_key(&["team"])),
            TableJob::new(
                healthy.clone(),
                odds(&[("BOS", -150), ("NYK", 130)]),
                business_key(&["team"]),
            ),
        ])
        .await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.succeeded(), 1);
    assert!(matches!(report.outcomes()[1], Outcome::Created(_)));
    assert_eq!(
        fetch_rows(&database.pool, &healthy, &["team", "moneyline"]).await,
        vec![text_row(&["BOS", "-150"]), text_row(&["NYK", "130"])]
    );
    assert_eq!(count_rows(&database.pool, &broken).await, 2);

    let err = pipeline.finish(&report).await.unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::ConstraintDefinitionFailed]);

    let deliveries = notifier.deliveries().await;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].len(), 1);
    assert_eq!(deliveries[0][0].table, broken);
    assert_eq!(deliveries[0][0].state, MergeState::ConstraintSync);
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_feature_flags_skip_their_tables() {
    init_test_tracing();
    let database = spawn_database().await;

    let flags_table = test_table_name("feature_flags");
    create_table(&database.pool, &flags_table, "flag text, is_enabled int").await;
    execute(
        &database.pool,
        &format!(
            "insert into {} values ('odds', 1), ('injuries', 0)",
            flags_table.as_quoted_identifier()
        ),
    )
    .await;
    let flags = FeatureFlags::load(&database.pool, &flags_table).await.unwrap();
    assert!(flags.is_enabled("odds"));
    assert!(!flags.is_enabled("injuries"));

    let odds_table = test_table_name("aws_odds_source");
    let injuries_table = test_table_name("aws_injury_data_source");
    let twitter_table = test_table_name("aws_twitter_data_source");

    let pipeline =
        Pipeline::new(database.pool.clone(), RecordingNotifier::new()).with_feature_flags(flags);
    let report = pipeline
        .run(vec![
            TableJob::new(odds_table.clone(), odds(&[("BOS", -150)]), business_key(&["team"]))
                .with_feature_flag("odds"),
            TableJob::new(
                injuries_table.clone(),
                odds(&[("BOS", 0)]),
                business_key(&["team"]),
            )
            .with_feature_flag("injuries"),
            TableJob::new(
                twitter_table.clone(),
                odds(&[("BOS", 0)]),
                business_key(&["team"]),
            )
            .with_feature_flag("twitter"),
        ])
        .await;

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.skipped().len(), 2);
    assert!(table_exists(&database.pool, &odds_table).await);
    assert!(!table_exists(&database.pool, &injuries_table).await);
    assert!(!table_exists(&database.pool, &twitter_table).await);
    assert!(pipeline.finish(&report).await.is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn boolean_feature_flags_are_supported() {
    init_test_tracing();
    let database = spawn_database().await;

    let flags_table = test_table_name("feature_flags");
    create_table(&database.pool, &flags_table, "flag text, is_enabled boolean").await;
    execute(
        &database.pool,
        &format!(
            "insert into {} values ('odds', true), ('injuries', false)",
            flags_table.as_quoted_identifier()
        ),
    )
    .await;

    let flags = FeatureFlags::load(&database.pool, &flags_table).await.unwrap();

    assert_eq!(flags.len(), 2);
    assert!(flags.is_enabled("odds"));
    assert!(!flags.is_enabled("injuries"));
}

#[tokio::test(flavor = "multi_thread")]
async fn notification_errors_do_not_hide_table_failures() {
    init_test_tracing();
    let database = spawn_database().await;
    let table = test_table_name("aws_odds_source");
    create_table(&database.pool, &table, "team text, moneyline bigint").await;

    let notifier = RecordingNotifier::failing();
    let pipeline = Pipeline::new(database.pool.clone(), notifier.clone());
    let report = pipeline
        .run(vec![TableJob::new(
            table,
            odds(&[("BOS", 1), ("BOS", 2)]),
            business_key(&["team"]),
        )])
        .await;

    let err = pipeline.finish(&report).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MergeConflict);
    assert_eq!(notifier.deliveries().await.len(), 1);
}
