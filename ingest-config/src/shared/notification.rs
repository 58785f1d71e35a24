use secrecy::SecretString;
use serde::Deserialize;

/// Configuration for posting run failures to a Slack incoming webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackNotificationConfig {
    /// Incoming webhook URL. Treated as a secret since it embeds the posting token.
    pub webhook_url: SecretString,
    /// Label inserted into the message, e.g. `NBA ELT Ingestion`.
    #[serde(default = "default_run_label")]
    pub run_label: String,
}

fn default_run_label() -> String {
    "ingestion".to_string()
}
