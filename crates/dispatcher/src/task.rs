//! Task model
//!
//! A `Task` is one logical multi-page fetch. Its `cursor` always names where
//! the next fetch resumes (`None` before the first page means "start"), so a
//! task handed back to the queue mid-pagination loses nothing.

use std::fmt;

use fetch_client::{Cursor, Endpoint, Page};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

/// Submission-order identity of a task within one dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// What the caller asks to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub endpoint: Endpoint,
    /// Resume point from an earlier run; `None` starts at the first page.
    #[serde(default)]
    pub start: Option<Cursor>,
    /// Higher runs first under priority scheduling. Ignored under FIFO.
    #[serde(default)]
    pub priority: u8,
}

impl TaskSpec {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            start: None,
            priority: 0,
        }
    }

    pub fn resume_from(mut self, cursor: Cursor) -> Self {
        self.start = Some(cursor);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

impl From<Endpoint> for TaskSpec {
    fn from(endpoint: Endpoint) -> Self {
        Self::new(endpoint)
    }
}

/// Lifecycle of a task.
///
/// Transitions:
/// - Pending → InProgress (assigned to a slot)
/// - InProgress → Pending (handed back with its cursor: rate limit, retry,
///   credential loss, end of burst)
/// - InProgress → Completed | Failed | PartiallyCompleted
/// - Pending → Failed (run cancelled or pool exhausted before assignment)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    PartiallyCompleted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::PartiallyCompleted
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::PartiallyCompleted => "partially_completed",
        }
    }

    fn can_become(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, InProgress) | (Pending, Failed) => true,
            (InProgress, Pending) => true,
            (InProgress, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A task and everything collected for it so far.
#[derive(Debug, Clone)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) spec: TaskSpec,
    pub(crate) cursor: Option<Cursor>,
    pub(crate) items: Vec<serde_json::Value>,
    pub(crate) pages: u32,
    pub(crate) retries: u32,
    pub(crate) status: TaskStatus,
    pub(crate) reason: Option<String>,
    /// Earliest instant the task may be assigned again (retry backoff).
    pub(crate) not_before: Option<Instant>,
}

impl Task {
    pub fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            cursor: spec.start.clone(),
            spec,
            items: Vec::new(),
            pages: 0,
            retries: 0,
            status: TaskStatus::Pending,
            reason: None,
            not_before: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn items(&self) -> &[serde_json::Value] {
        &self.items
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Append a page in arrival order and move the cursor. Returns whether
    /// more pages follow.
    pub fn absorb(&mut self, page: Page) -> bool {
        self.items.extend(page.items);
        self.pages += 1;
        self.cursor = page.next;
        self.cursor.is_some()
    }

    /// Apply a status change, refusing anything that is not a forward move
    /// (or an explicit hand-back to Pending).
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_become(next) {
            warn!(task_id = %self.id, from = %self.status, to = %next, "invalid task transition ignored");
            return false;
        }
        self.status = next;
        true
    }

    /// Move to a terminal status with an optional reason.
    pub fn finish(&mut self, status: TaskStatus, reason: Option<String>) -> bool {
        debug_assert!(status.is_terminal());
        if self.transition(status) {
            self.reason = reason;
            self.not_before = None;
            true
        } else {
            false
        }
    }
}
