//! Idempotent ingestion of scraped tabular batches into Postgres.
//!
//! The [`upsert`] module holds the merge engine: a single [`upsert::merge`] call creates a
//! missing destination from its batch, or stages the batch and upserts it on the business key
//! of an existing one. [`pipeline`] runs the engine over the tables of one ingestion run and
//! reports failures through a [`notification::FailureNotifier`].

pub mod error;
pub mod feature_flags;
mod macros;
pub mod notification;
pub mod pipeline;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod types;
pub mod upsert;

pub use upsert::{MergeContext, MergeFailure, MergeResult, MergeState, Outcome, merge};
