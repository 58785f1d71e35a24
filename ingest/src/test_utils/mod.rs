//! Helpers for integration tests against a real Postgres instance.
//!
//! - [`database`] creates an isolated database per test.
//! - [`table`] builds batches and inspects destination tables.
//! - [`notifier`] records failure notifications.

pub mod database;
pub mod notifier;
pub mod table;
