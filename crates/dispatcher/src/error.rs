//! Dispatcher error types
//!
//! Only setup can fail. Once a run starts, every problem ends up on the
//! manifest as a task status or a halt reason.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] common::Error),

    #[error("invalid credential pool: {0}")]
    Pool(#[from] credential_pool::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
