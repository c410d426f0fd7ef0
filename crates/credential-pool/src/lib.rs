//! Credential slot pool for the pagination dispatcher
//!
//! Each distinct credential becomes a slot with its own API client, quota
//! estimate and status. Workers lease the lowest-index usable slot, drive
//! calls through it, and release it with an outcome that decides the next
//! status.
//!
//! Slot lifecycle:
//! 1. Pool built from credentials → every slot `Idle`
//! 2. Worker acquires → `Busy`, quota travels with the lease
//! 3. Released with quota left → `Idle`
//! 4. Released with an empty window → `Exhausted` until the reset time
//! 5. Next acquire after the reset → usable again (no timer involved)
//! 6. Released as revoked (credential rejected) → `Dead` for the run

pub mod error;
pub mod pool;
pub mod quota;
pub mod slot;

pub use error::{Error, Result};
pub use pool::{PoolCounts, SlotPool, Unavailable};
pub use quota::{FailureKind, QuotaState};
pub use slot::{SlotLease, SlotOutcome, SlotReport, SlotStatus};
