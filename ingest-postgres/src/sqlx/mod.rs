mod pool;
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use pool::connect_to_database;
