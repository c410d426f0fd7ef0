//! Credential slots and the leases handed out for them
//!
//! A `Slot` is owned by the pool. While a worker holds a `SlotLease` the
//! slot is `Busy` and the lease carries the slot's quota and pacing state, so
//! the network call never touches pool-wide state. `release` writes the
//! lease's state back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use common::Credential;
use fetch_client::{EndpointKind, FetchClient};
use serde::Serialize;
use tokio::time::Instant;

use crate::quota::QuotaState;

/// Runtime status of a slot.
///
/// Transitions:
/// - Idle → Busy (acquired)
/// - Busy → Idle (released with quota left)
/// - Busy → Exhausted (released with an empty window)
/// - Busy → Dead (credential rejected)
/// - Exhausted → Busy (acquired after the reset passed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Idle,
    Busy,
    Exhausted { until: Instant },
    Dead,
}

impl SlotStatus {
    /// Status label for logging, metrics and reports.
    pub fn label(&self) -> &'static str {
        match self {
            SlotStatus::Idle => "idle",
            SlotStatus::Busy => "busy",
            SlotStatus::Exhausted { .. } => "exhausted",
            SlotStatus::Dead => "dead",
        }
    }
}

pub(crate) struct Slot {
    pub(crate) fingerprint: String,
    pub(crate) client: Arc<dyn FetchClient>,
    pub(crate) quota: QuotaState,
    pub(crate) status: SlotStatus,
    pub(crate) last_call: HashMap<EndpointKind, Instant>,
    pub(crate) calls: u64,
}

impl Slot {
    pub(crate) fn new(
        credential: &Credential,
        client: Arc<dyn FetchClient>,
        quota: QuotaState,
    ) -> Self {
        Self {
            fingerprint: credential.fingerprint(),
            client,
            quota,
            status: SlotStatus::Idle,
            last_call: HashMap::new(),
            calls: 0,
        }
    }
}

/// Exclusive use of one slot until it is released back to the pool.
pub struct SlotLease {
    pub(crate) index: usize,
    pub(crate) fingerprint: String,
    pub(crate) client: Arc<dyn FetchClient>,
    pub(crate) last_call: HashMap<EndpointKind, Instant>,
    pub(crate) calls: u64,
    /// Quota state for the duration of the lease.
    pub quota: QuotaState,
}

impl SlotLease {
    /// Position of the slot in the pool (lowest index is preferred).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn client(&self) -> &dyn FetchClient {
        self.client.as_ref()
    }

    /// Earliest instant the next `kind` call may go out when pacing.
    pub fn paced_until(&self, kind: EndpointKind) -> Option<Instant> {
        self.last_call
            .get(&kind)
            .map(|last| *last + kind.min_interval())
    }

    /// Note that a call of `kind` was issued at `now`.
    pub fn note_call(&mut self, kind: EndpointKind, now: Instant) {
        self.last_call.insert(kind, now);
        self.calls += 1;
    }

    /// Calls issued through this slot over the whole run, this lease included.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLease")
            .field("index", &self.index)
            .field("fingerprint", &self.fingerprint)
            .field("quota", &self.quota)
            .field("calls", &self.calls)
            .finish()
    }
}

/// How a lease ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    /// Slot is healthy; it becomes Idle or Exhausted depending on its quota.
    Returned,
    /// Credential was rejected; the slot is Dead for the rest of the run.
    Revoked { reason: String },
}

/// End-of-run summary of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotReport {
    pub fingerprint: String,
    pub status: &'static str,
    pub calls: u64,
}
