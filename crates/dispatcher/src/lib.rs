//! Credential-pooled pagination dispatcher
//!
//! Spreads many independent paginated fetches across a pool of credentials
//! so throughput grows with the number of accounts rather than being capped
//! by one account's rate limit.
//!
//! A run looks like this:
//!
//! 1. The caller hands `Dispatcher::dispatch` a list of credentials (each
//!    paired with a `FetchClient`) and a list of `TaskSpec`s.
//! 2. One worker per credential leases the lowest-index usable slot, takes the
//!    next pending task and paginates it for a bounded burst of pages.
//! 3. Rate limits suspend the slot until its window resets and hand the task
//!    back with its cursor; rejected credentials are retired; transient
//!    failures back off and retry within a per-task budget.
//! 4. The returned `Manifest` has one entry per task with its status, items
//!    in page order, the cursor to resume from and the reason it stopped.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod paginator;
pub mod queue;
pub mod retry;
pub mod task;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregator::{Aggregator, Halt, Manifest, ManifestEntry};
pub use config::{DispatchConfig, Scheduling};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use paginator::{PageOutcome, Paginator};
pub use queue::{Next, TaskQueue};
pub use retry::{Decision, RetryPolicy, TaskAction, decide};
pub use task::{Task, TaskId, TaskSpec, TaskStatus};

pub use tokio_util::sync::CancellationToken;
