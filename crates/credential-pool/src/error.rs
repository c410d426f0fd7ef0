//! Error types for pool construction

/// Errors from building a slot pool.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no credentials supplied")]
    NoCredentials,

    #[error("quota ceiling must be greater than 0 (credential {0})")]
    InvalidCeiling(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
