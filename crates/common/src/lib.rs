//! Common types shared by the dispatcher crates
//!
//! Holds the credential material handed to each pool slot, the redacting
//! `Secret` wrapper around it, and the configuration error type.

mod credential;
mod error;
mod secret;

pub use credential::Credential;
pub use error::{Error, Result};
pub use secret::Secret;
