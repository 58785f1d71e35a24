use ingest_config::shared::{INGEST_MERGE_OPTIONS, IntoConnectOptions, PgConnectionConfig};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Builds a connection pool to the destination database.
///
/// Every pooled connection carries the merge session settings (UTC timezone, ISO dates and
/// bounded lock waits). The first connection is established eagerly so that an unreachable
/// database is reported before any batch is processed.
pub async fn connect_to_database(
    config: &PgConnectionConfig,
    min_connections: u32,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    let options = config.with_db(Some(&INGEST_MERGE_OPTIONS));

    let pool = PgPoolOptions::new()
        .min_connections(min_connections)
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    info!(
        host = %config.host,
        port = config.port,
        database = %config.name,
        "connected to destination database"
    );

    Ok(pool)
}
