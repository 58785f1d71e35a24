//! Slack delivery of failed tables.

use chrono::{NaiveDate, Utc};
use ingest::error::{ErrorKind, IngestResult};
use ingest::notification::{FailureNotifier, render_failures};
use ingest::upsert::MergeFailure;
use ingest::{bail, ingest_error};
use ingest_config::shared::SlackNotificationConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
struct SlackMessage {
    text: String,
}

/// Posts one message per run to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: SecretString,
    run_label: String,
}

impl SlackNotifier {
    pub fn new(config: &SlackNotificationConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            webhook_url: config.webhook_url.clone(),
            run_label: config.run_label.clone(),
        }
    }
}

impl FailureNotifier for SlackNotifier {
    async fn notify(&self, failures: &[MergeFailure]) -> IngestResult<()> {
        let message = SlackMessage {
            text: render_message(&self.run_label, Utc::now().date_naive(), failures),
        };

        info!(failures = failures.len(), "sending failure notification to Slack");

        let response = self
            .client
            .post(self.webhook_url.expose_secret().as_str())
            .json(&message)
            .send()
            .await
            .map_err(|err| {
                ingest_error!(
                    ErrorKind::NotificationFailed,
                    "Failed to send Slack notification",
                    detail = err.to_string(),
                    source: err
                )
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read body>".to_string());

            bail!(
                ErrorKind::NotificationFailed,
                "Slack rejected the notification",
                format!("status {status}: {body}")
            );
        }

        Ok(())
    }
}

fn render_message(run_label: &str, date: NaiveDate, failures: &[MergeFailure]) -> String {
    format!(
        "🛑 {} Errors during {run_label} on {date}: \n {}",
        failures.len(),
        render_failures(failures)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::types::TableName;
    use ingest::upsert::MergeState;

    #[test]
    fn message_counts_and_lists_failures() {
        let failures = vec![MergeFailure {
            table: TableName::new("nba_source", "aws_odds_source"),
            attempted_rows: 4,
            state: MergeState::Merge,
            error: ingest_error!(ErrorKind::MergeConflict, "Batch contains duplicate business keys"),
        }];

        let message = render_message(
            "ingestion",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            &failures,
        );

        assert_eq!(
            message,
            "🛑 1 Errors during ingestion on 2024-01-01: \n \
             nba_source.aws_odds_source (4 rows, failed during MERGE): \
             [MergeConflict] Batch contains duplicate business keys"
        );
    }
}
