//! Data handed to the merge engine: row batches, their cells and business keys.

mod batch;
mod cell;
mod key;

pub use batch::RowBatch;
pub use cell::{Cell, ColumnType};
pub use key::BusinessKey;

pub use ingest_postgres::TableName;
