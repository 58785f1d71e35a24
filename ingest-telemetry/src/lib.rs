//! Tracing initialisation for ingestion binaries and tests.

pub mod tracing;
