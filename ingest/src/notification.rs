//! Delivery of per-run failure reports to operators.

use std::future::Future;

use crate::error::IngestResult;
use crate::upsert::MergeFailure;

/// Receives the failed tables of a pipeline run.
///
/// Called at most once per run with every failure of that run. Implementations must not
/// assume the run stops after a notification; delivery errors are logged by the caller.
pub trait FailureNotifier {
    fn notify(&self, failures: &[MergeFailure]) -> impl Future<Output = IngestResult<()>> + Send;
}

/// Notifier that discards failures. Used when no channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl FailureNotifier for NoopNotifier {
    async fn notify(&self, _failures: &[MergeFailure]) -> IngestResult<()> {
        Ok(())
    }
}

/// Notifies through the wrapped notifier when one is configured.
impl<N> FailureNotifier for Option<N>
where
    N: FailureNotifier + Sync,
{
    async fn notify(&self, failures: &[MergeFailure]) -> IngestResult<()> {
        match self {
            Some(notifier) => notifier.notify(failures).await,
            None => Ok(()),
        }
    }
}

/// Renders failures one per line, e.g. `nba_source.t (3 rows, failed during MERGE): ...`.
pub fn render_failures(failures: &[MergeFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
