//! Result aggregation and the run manifest
//!
//! The `Aggregator` collects terminal tasks as they finish, in whatever order
//! the workers produce them. `Aggregator::finish` turns that into a
//! `Manifest` ordered by task id, with exactly one entry per submitted task.

use std::collections::BTreeMap;

use credential_pool::{PoolCounts, SlotReport};
use fetch_client::Cursor;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::task::{Task, TaskId, TaskSpec, TaskStatus};

/// Final record of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub id: TaskId,
    pub spec: TaskSpec,
    pub status: TaskStatus,
    /// Why the task did not complete cleanly, if it did not.
    pub reason: Option<String>,
    /// Collected items in page-arrival order. Kept for partial and failed tasks.
    pub items: Vec<Value>,
    /// Where a follow-up run would resume; `None` once the source is exhausted.
    pub cursor: Option<Cursor>,
    pub pages: u32,
    pub retries: u32,
}

impl From<Task> for ManifestEntry {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            spec: task.spec,
            status: task.status,
            reason: task.reason,
            items: task.items,
            cursor: task.cursor,
            pages: task.pages,
            retries: task.retries,
        }
    }
}

/// Why a run stopped before every task could run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Halt {
    /// The caller's cancellation token fired.
    Cancelled,
    /// Every credential was rejected; nothing could make progress.
    PoolExhausted(PoolCounts),
}

/// Outcome of one dispatch run.
#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub run_id: Uuid,
    /// One entry per submitted task, ordered by task id.
    pub entries: Vec<ManifestEntry>,
    pub halt: Option<Halt>,
    /// Per-credential summary in pool order.
    pub slots: Vec<SlotReport>,
}

impl Manifest {
    /// Keyed view.
    pub fn get(&self, id: TaskId) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by_key(&id, |entry| entry.id)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every collected item, task by task in id order.
    pub fn items(&self) -> impl Iterator<Item = &Value> + '_ {
        self.entries.iter().flat_map(|entry| entry.items.iter())
    }

    pub fn with_status(&self, status: TaskStatus) -> impl Iterator<Item = &ManifestEntry> + '_ {
        self.entries.iter().filter(move |entry| entry.status == status)
    }

    /// True when every task completed and the run was not halted.
    pub fn is_complete(&self) -> bool {
        self.halt.is_none()
            && self
                .entries
                .iter()
                .all(|entry| entry.status == TaskStatus::Completed)
    }

    /// Specs that continue every Failed or PartiallyCompleted task from its
    /// saved cursor. Items already in this manifest are not fetched again.
    pub fn resumable(&self) -> Vec<TaskSpec> {
        self.entries
            .iter()
            .filter(|entry| {
                matches!(
                    entry.status,
                    TaskStatus::Failed | TaskStatus::PartiallyCompleted
                )
            })
            .map(|entry| TaskSpec {
                start: entry.cursor.clone(),
                ..entry.spec.clone()
            })
            .collect()
    }
}

/// Collects terminal tasks during a run.
#[derive(Debug, Default)]
pub struct Aggregator {
    entries: BTreeMap<TaskId, ManifestEntry>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix a terminal task's entry. A second merge for the same id is ignored.
    pub fn merge(&mut self, task: Task) -> bool {
        if !task.status.is_terminal() {
            warn!(task_id = %task.id, status = %task.status, "non-terminal task not merged");
            return false;
        }
        if self.entries.contains_key(&task.id) {
            warn!(task_id = %task.id, "task already merged, ignoring");
            return false;
        }
        self.entries.insert(task.id, ManifestEntry::from(task));
        true
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close the run. Entries come out in task id order.
    pub fn finish(self, run_id: Uuid, halt: Option<Halt>, slots: Vec<SlotReport>) -> Manifest {
        Manifest {
            run_id,
            entries: self.entries.into_values().collect(),
            halt,
            slots,
        }
    }
}
