//! API client seam for the pagination dispatcher
//!
//! Defines the `FetchClient` trait the dispatcher drives once per credential,
//! together with the values that cross it: `Endpoint` (what to list),
//! `Cursor` (where to resume), `Page` (one response) and `FetchError` (how a
//! call failed). The dispatcher never builds requests itself; everything
//! wire-specific lives behind this trait.
//!
//! `HttpFetchClient` is a reference implementation for a cursor-paginated
//! JSON REST API that reports quota through `x-rate-limit-*` headers.

pub mod classify;
pub mod endpoint;
pub mod http;

pub use classify::classify_status;
pub use endpoint::{Endpoint, EndpointKind, LOOKUP_CHUNK, UserRef};
pub use http::HttpFetchClient;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Opaque pagination token. Only the client that produced it interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Quota metadata reported alongside a response.
///
/// Either field may be missing; the quota tracker falls back to its local
/// estimate for whatever is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimit {
    /// Calls left in the current window.
    pub remaining: Option<u32>,
    /// Time until the window resets, relative to when the response arrived.
    pub reset_after: Option<Duration>,
}

/// One fetch result.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<serde_json::Value>,
    /// `None` is the end marker: the source has no further pages.
    pub next: Option<Cursor>,
    pub rate_limit: Option<RateLimit>,
}

impl Page {
    pub fn new(items: Vec<serde_json::Value>, next: Option<Cursor>) -> Self {
        Self {
            items,
            next,
            rate_limit: None,
        }
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }
}

/// Classified failure of a single fetch.
///
/// The variants decide what happens to the credential and the task:
/// - `RateLimited` suspends the credential until its window resets
/// - `Unauthorized` retires the credential for the rest of the run
/// - `TargetUnavailable` ends the task (the target itself is not readable)
/// - `Malformed` fails the task without retry
/// - `Transient` is retried with backoff
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("rate limited")]
    RateLimited { reset_after: Option<Duration> },

    #[error("credential rejected: {0}")]
    Unauthorized(String),

    #[error("target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

/// Result alias for fetch operations.
pub type Result<T> = std::result::Result<T, FetchError>;

/// Boxed future returned by `FetchClient::fetch`.
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Page>> + Send + 'a>>;

/// The only point of contact between the dispatcher and the remote API.
///
/// One instance is bound to one credential. Uses a boxed future so pools can
/// hold `Arc<dyn FetchClient>` for heterogeneous clients.
pub trait FetchClient: Send + Sync {
    /// Fetch one page of `endpoint`, resuming at `cursor` (`None` = first page).
    fn fetch<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        cursor: Option<&'a Cursor>,
    ) -> FetchFuture<'a>;
}
