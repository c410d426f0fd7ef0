//! Single-step pagination over a leased slot
//!
//! `advance` issues at most one call. It checks the lease's quota first and
//! refuses to call into an empty window. Whether a task is finished is
//! decided only by the page's next cursor, never by how many items came back.

use credential_pool::{FailureKind, SlotLease};
use fetch_client::FetchError;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::task::Task;

/// Result of one pagination step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// A page was appended and more follow.
    Page { items: usize },
    /// The final page was appended.
    Exhausted { items: usize },
    /// The slot's window is spent (locally known or reported by the server).
    RateLimited,
    /// The credential was rejected.
    AuthError(String),
    /// A retryable failure.
    TransientError(String),
    /// The request itself is invalid; retrying cannot help.
    Malformed(String),
    /// The target cannot be read by any credential.
    TargetUnavailable(String),
    /// Cancellation arrived while waiting to pace the call; nothing was sent.
    Cancelled,
}

impl PageOutcome {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            PageOutcome::Page { .. } => "page",
            PageOutcome::Exhausted { .. } => "exhausted",
            PageOutcome::RateLimited => "rate_limited",
            PageOutcome::AuthError(_) => "auth_error",
            PageOutcome::TransientError(_) => "transient_error",
            PageOutcome::Malformed(_) => "malformed",
            PageOutcome::TargetUnavailable(_) => "target_unavailable",
            PageOutcome::Cancelled => "cancelled",
        }
    }
}

/// Drives one fetch per `advance` call.
#[derive(Debug, Clone)]
pub struct Paginator {
    pacing: bool,
    cancel: CancellationToken,
}

impl Paginator {
    pub fn new(pacing: bool, cancel: CancellationToken) -> Self {
        Self { pacing, cancel }
    }

    /// Fetch the task's next page through the lease's client.
    pub async fn advance(&self, task: &mut Task, lease: &mut SlotLease) -> PageOutcome {
        let kind = task.spec.endpoint.kind();

        if !lease.quota.can_call(Instant::now()) {
            debug!(task_id = %task.id, slot = %lease.fingerprint(), "no quota left, not calling");
            return PageOutcome::RateLimited;
        }

        let paced = if self.pacing {
            lease.paced_until(kind)
        } else {
            None
        };
        if let Some(at) = paced.filter(|at| *at > Instant::now()) {
            tokio::select! {
                _ = sleep_until(at) => {}
                _ = self.cancel.cancelled() => return PageOutcome::Cancelled,
            }
        }

        lease.note_call(kind, Instant::now());
        let result = lease
            .client()
            .fetch(&task.spec.endpoint, task.cursor.as_ref())
            .await;
        let now = Instant::now();

        match result {
            Ok(page) => {
                lease.quota.record(page.rate_limit.as_ref(), now);
                let items = page.items.len();
                let more = task.absorb(page);
                debug!(
                    task_id = %task.id,
                    slot = %lease.fingerprint(),
                    items,
                    page = task.pages,
                    more,
                    "page fetched"
                );
                if more {
                    PageOutcome::Page { items }
                } else {
                    PageOutcome::Exhausted { items }
                }
            }
            Err(FetchError::RateLimited { reset_after }) => {
                lease
                    .quota
                    .record_failure(FailureKind::RateLimited { reset_after }, now);
                PageOutcome::RateLimited
            }
            Err(FetchError::Unauthorized(msg)) => PageOutcome::AuthError(msg),
            Err(FetchError::TargetUnavailable(msg)) => {
                lease.quota.record_failure(FailureKind::Other, now);
                PageOutcome::TargetUnavailable(msg)
            }
            Err(FetchError::Malformed(msg)) => {
                lease.quota.record_failure(FailureKind::Other, now);
                PageOutcome::Malformed(msg)
            }
            Err(FetchError::Transient(msg)) => {
                lease.quota.record_failure(FailureKind::Other, now);
                PageOutcome::TransientError(msg)
            }
        }
    }
}
