use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, IngestResult};
use crate::notification::FailureNotifier;
use crate::upsert::MergeFailure;

/// Notifier keeping every delivered batch of failures in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    deliveries: Arc<Mutex<Vec<Vec<MergeFailure>>>>,
    fail_deliveries: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a notifier that records deliveries and then reports them as failed.
    pub fn failing() -> Self {
        Self {
            deliveries: Arc::default(),
            fail_deliveries: true,
        }
    }

    pub async fn deliveries(&self) -> Vec<Vec<MergeFailure>> {
        self.deliveries.lock().await.clone()
    }
}

impl FailureNotifier for RecordingNotifier {
    async fn notify(&self, failures: &[MergeFailure]) -> IngestResult<()> {
        self.deliveries.lock().await.push(failures.to_vec());

        if self.fail_deliveries {
            bail!(ErrorKind::NotificationFailed, "Notification channel is unavailable");
        }

        Ok(())
    }
}
