//! Shared configuration types for ingestion services.

mod base;
mod connection;
mod loader;
mod notification;

pub use base::ValidationError;
pub use connection::{
    INGEST_MERGE_OPTIONS, INGEST_TEST_OPTIONS, IntoConnectOptions, PgConnectionConfig,
    PgConnectionConfigWithoutSecrets, PgConnectionOptions, TlsConfig,
};
pub use loader::{JobConfig, LoaderConfig, PoolConfig};
pub use notification::SlackNotificationConfig;
