use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// A job declares an empty business key.
    #[error("job for table `{0}` must declare at least one business key column")]
    EmptyBusinessKey(String),
    /// A job declares the same business key column more than once.
    #[error("job for table `{table}` repeats business key column `{column}`")]
    DuplicateBusinessKeyColumn { table: String, column: String },
    /// Two jobs write to the same destination table.
    #[error("table `{0}` is configured by more than one job")]
    DuplicateJobTable(String),
    /// A field holds a value outside its allowed range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
