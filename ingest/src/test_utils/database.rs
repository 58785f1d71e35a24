use ingest_config::shared::{PgConnectionConfig, TlsConfig};
use ingest_postgres::TableName;
use ingest_postgres::sqlx::test_utils::PgDatabase;
use uuid::Uuid;

/// Schema holding the tables created by tests.
pub const TEST_DATABASE_SCHEMA: &str = "test";

/// Creates a [`TableName`] in [`TEST_DATABASE_SCHEMA`].
pub fn test_table_name(name: &str) -> TableName {
    TableName::new(TEST_DATABASE_SCHEMA, name)
}

/// Connection configuration for a fresh database on the test server.
///
/// Reads `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT`, `TESTS_DATABASE_USERNAME` and the
/// optional `TESTS_DATABASE_PASSWORD`. The database name is a random UUID.
fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig::disabled(),
    }
}

/// Creates an isolated database containing an empty [`TEST_DATABASE_SCHEMA`].
///
/// # Panics
///
/// Panics if the database or the test schema cannot be created.
pub async fn spawn_database() -> PgDatabase {
    let database = PgDatabase::new(local_pg_connection_config()).await;

    sqlx::query(&format!("create schema {TEST_DATABASE_SCHEMA}"))
        .execute(&database.pool)
        .await
        .expect("Failed to create test schema");

    database
}
