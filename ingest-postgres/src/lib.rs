//! Postgres plumbing shared by the ingestion crates: qualified table names, pool
//! construction and database helpers for tests.

mod schema;
pub mod sqlx;

pub use schema::{MAX_IDENTIFIER_LEN, TableName, quote_identifier_list};
