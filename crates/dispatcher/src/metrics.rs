//! Dispatcher metrics
//!
//! - `dispatch_fetches_total` (counter): labels `endpoint`, `outcome`
//! - `dispatch_tasks_finished_total` (counter): label `status`
//!
//! Slot transitions are counted by the pool as `pool_slot_transitions_total`.
//! Installing a recorder is up to the embedding application; without one
//! these calls are no-ops.

use fetch_client::EndpointKind;

use crate::paginator::PageOutcome;
use crate::task::TaskStatus;

/// Record one paginator step.
pub fn record_fetch(endpoint: EndpointKind, outcome: &PageOutcome) {
    metrics::counter!(
        "dispatch_fetches_total",
        "endpoint" => endpoint.label(),
        "outcome" => outcome.label()
    )
    .increment(1);
}

/// Record a task reaching a terminal status.
pub fn record_task_finished(status: TaskStatus) {
    metrics::counter!("dispatch_tasks_finished_total", "status" => status.label()).increment(1);
}
