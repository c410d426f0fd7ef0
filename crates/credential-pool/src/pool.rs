//! Slot pool: lowest-index acquisition and lease release
//!
//! The pool holds one `Slot` per distinct credential behind a single mutex.
//! Every state change (acquire, release) is a short critical section with no
//! suspension inside, so two acquirers can never receive the same slot.
//!
//! Exhausted slots come back lazily: `acquire` checks each Exhausted slot's
//! reset time and hands it out once the reset has passed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use common::Credential;
use fetch_client::FetchClient;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::quota::QuotaState;
use crate::slot::{Slot, SlotLease, SlotOutcome, SlotReport, SlotStatus};

/// Why `acquire` could not hand out a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    /// Every usable slot is leased. One comes back on release, or an
    /// exhausted slot at `next_reset`, whichever is first.
    AllBusy { next_reset: Option<Instant> },
    /// No slot is free before this instant (the earliest reset).
    ExhaustedUntil(Instant),
    /// Every slot is Dead. Nothing will ever become usable.
    AllDead,
}

/// Slot counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounts {
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub exhausted: usize,
    pub dead: usize,
}

impl fmt::Display for PoolCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} slots: {} idle, {} busy, {} exhausted, {} dead",
            self.total, self.idle, self.busy, self.exhausted, self.dead
        )
    }
}

/// Pool of credential slots scoped to one dispatch run.
pub struct SlotPool {
    slots: Mutex<Vec<Slot>>,
}

impl SlotPool {
    /// Build a pool from credentials and their API clients.
    ///
    /// A credential whose token pair repeats an earlier one is skipped with a
    /// warning. Each slot's ceiling is the credential's override, else
    /// `default_ceiling`.
    pub fn new(
        entries: Vec<(Credential, Arc<dyn FetchClient>)>,
        default_ceiling: u32,
        fallback_window: Duration,
    ) -> Result<Self> {
        let mut accepted: Vec<Credential> = Vec::with_capacity(entries.len());
        let mut slots = Vec::with_capacity(entries.len());

        for (credential, client) in entries {
            if accepted.iter().any(|c| c.same_account(&credential)) {
                warn!(
                    slot = %credential.fingerprint(),
                    "duplicate credential skipped"
                );
                continue;
            }
            let ceiling = credential.quota_ceiling().unwrap_or(default_ceiling);
            if ceiling == 0 {
                return Err(Error::InvalidCeiling(credential.fingerprint()));
            }
            slots.push(Slot::new(
                &credential,
                client,
                QuotaState::new(ceiling, fallback_window),
            ));
            accepted.push(credential);
        }

        if slots.is_empty() {
            return Err(Error::NoCredentials);
        }
        info!(slots = slots.len(), "slot pool initialized");
        Ok(Self {
            slots: Mutex::new(slots),
        })
    }

    /// Number of slots, whatever their status.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Lease the lowest-index usable slot.
    ///
    /// Idle slots are usable. Exhausted slots are usable once their reset has
    /// passed; the quota window rolls over when the lease checks it.
    pub async fn acquire(&self) -> std::result::Result<SlotLease, Unavailable> {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;

        let mut earliest_reset: Option<Instant> = None;
        let mut any_busy = false;

        for (index, slot) in slots.iter_mut().enumerate() {
            match slot.status {
                SlotStatus::Idle => {}
                SlotStatus::Exhausted { until } if until <= now => {
                    info!(slot = %slot.fingerprint, "reset time passed, slot usable again");
                }
                SlotStatus::Exhausted { until } => {
                    earliest_reset = Some(earliest_reset.map_or(until, |e| e.min(until)));
                    continue;
                }
                SlotStatus::Busy => {
                    any_busy = true;
                    continue;
                }
                SlotStatus::Dead => continue,
            }

            slot.status = SlotStatus::Busy;
            debug!(slot = %slot.fingerprint, index, "slot acquired");
            return Ok(SlotLease {
                index,
                fingerprint: slot.fingerprint.clone(),
                client: Arc::clone(&slot.client),
                last_call: slot.last_call.clone(),
                calls: slot.calls,
                quota: slot.quota.clone(),
            });
        }

        // A busy slot may come back Idle before any reset, so report AllBusy
        // whenever one exists, carrying the reset so the caller can wait for
        // both.
        match (any_busy, earliest_reset) {
            (true, next_reset) => Err(Unavailable::AllBusy { next_reset }),
            (false, Some(until)) => Err(Unavailable::ExhaustedUntil(until)),
            (false, None) => Err(Unavailable::AllDead),
        }
    }

    /// Return a lease, writing its quota and pacing state back.
    ///
    /// - `Returned` with quota left → Idle
    /// - `Returned` with an empty window → Exhausted until the reset
    /// - `Revoked` → Dead
    pub async fn release(&self, lease: SlotLease, outcome: SlotOutcome) {
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.get_mut(lease.index) else {
            warn!(index = lease.index, "release for unknown slot ignored");
            return;
        };

        slot.quota = lease.quota;
        slot.last_call = lease.last_call;
        slot.calls = lease.calls;

        let next = match outcome {
            SlotOutcome::Revoked { reason } => {
                warn!(slot = %slot.fingerprint, %reason, "credential rejected, slot dead");
                SlotStatus::Dead
            }
            SlotOutcome::Returned => match slot.quota.exhausted_until(now) {
                Some(until) => {
                    info!(
                        slot = %slot.fingerprint,
                        reset_in_secs = (until - now).as_secs(),
                        "slot exhausted until quota reset"
                    );
                    SlotStatus::Exhausted { until }
                }
                None => SlotStatus::Idle,
            },
        };

        if next.label() != slot.status.label() {
            metrics::counter!("pool_slot_transitions_total", "status" => next.label())
                .increment(1);
        }
        slot.status = next;
    }

    /// Count slots by status. Exhausted slots whose reset has passed count
    /// as idle.
    pub async fn counts(&self) -> PoolCounts {
        let now = Instant::now();
        let slots = self.slots.lock().await;
        let mut counts = PoolCounts {
            total: slots.len(),
            ..PoolCounts::default()
        };
        for slot in slots.iter() {
            match slot.status {
                SlotStatus::Idle => counts.idle += 1,
                SlotStatus::Busy => counts.busy += 1,
                SlotStatus::Exhausted { until } if until <= now => counts.idle += 1,
                SlotStatus::Exhausted { .. } => counts.exhausted += 1,
                SlotStatus::Dead => counts.dead += 1,
            }
        }
        counts
    }

    /// Whether any slot can still serve calls in this run.
    pub async fn has_viable(&self) -> bool {
        self.slots
            .lock()
            .await
            .iter()
            .any(|s| s.status != SlotStatus::Dead)
    }

    /// Whether any slot other than `index` can still serve calls.
    pub async fn has_viable_besides(&self, index: usize) -> bool {
        self.slots
            .lock()
            .await
            .iter()
            .enumerate()
            .any(|(i, s)| i != index && s.status != SlotStatus::Dead)
    }

    /// Per-slot summary in pool order.
    pub async fn report(&self) -> Vec<SlotReport> {
        self.slots
            .lock()
            .await
            .iter()
            .map(|slot| SlotReport {
                fingerprint: slot.fingerprint.clone(),
                status: slot.status.label(),
                calls: slot.calls,
            })
            .collect()
    }
}
