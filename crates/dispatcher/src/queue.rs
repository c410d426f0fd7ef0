//! Pending-task queue
//!
//! Tasks keep the position they were given at submission. A task handed back
//! mid-pagination re-enters at that same position, so under FIFO an older
//! task always goes before a younger one. Tasks in retry backoff are skipped
//! until their `not_before` passes without blocking the tasks behind them.

use std::collections::BTreeSet;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Scheduling;
use crate::task::{Task, TaskId, TaskSpec, TaskStatus};

/// What the queue has to offer right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// A task can be taken immediately.
    Ready,
    /// Every pending task is backing off; the earliest becomes eligible then.
    WaitUntil(Instant),
    /// Nothing pending but tasks are still running and may come back.
    Idle,
    /// Every task has reached a terminal status.
    Drained,
}

/// Queue position: rank first (0 under FIFO), then submission order.
type Position = (u8, TaskId);

pub struct TaskQueue {
    scheduling: Scheduling,
    /// Pending tasks by id; `None` while a task is running or after it finished.
    tasks: Vec<Option<Task>>,
    pending: BTreeSet<Position>,
    in_flight: usize,
}

impl TaskQueue {
    /// Queue every spec as Pending, ids in submission order.
    pub fn new(specs: Vec<TaskSpec>, scheduling: Scheduling) -> Self {
        let tasks: Vec<Option<Task>> = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| Some(Task::new(TaskId(i), spec)))
            .collect();
        let pending = tasks
            .iter()
            .flatten()
            .map(|task| (rank(scheduling, task), task.id))
            .collect();
        Self {
            scheduling,
            tasks,
            pending,
            in_flight: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }

    /// Report what `take_next` would do at `now` without taking anything.
    pub fn peek(&self, now: Instant) -> Next {
        if self.pending.is_empty() {
            return if self.in_flight == 0 {
                Next::Drained
            } else {
                Next::Idle
            };
        }
        let mut earliest: Option<Instant> = None;
        for (_, id) in &self.pending {
            match self.not_before(*id) {
                Some(at) if at > now => {
                    earliest = Some(earliest.map_or(at, |e| e.min(at)));
                }
                _ => return Next::Ready,
            }
        }
        match earliest {
            Some(at) => Next::WaitUntil(at),
            None => Next::Ready,
        }
    }

    /// Take the first eligible task in queue order and mark it InProgress.
    pub fn take_next(&mut self, now: Instant) -> Option<Task> {
        let position = *self
            .pending
            .iter()
            .find(|(_, id)| self.not_before(*id).is_none_or(|at| at <= now))?;
        self.pending.remove(&position);

        let mut task = self.tasks.get_mut((position.1).0)?.take()?;
        task.not_before = None;
        task.transition(TaskStatus::InProgress);
        self.in_flight += 1;
        debug!(task_id = %task.id, pending = self.pending.len(), "task assigned");
        Some(task)
    }

    /// Hand a running task back as Pending at its original position.
    pub fn requeue(&mut self, mut task: Task, not_before: Option<Instant>) {
        task.transition(TaskStatus::Pending);
        task.not_before = not_before;
        let id = task.id;
        let position = (rank(self.scheduling, &task), id);
        match self.tasks.get_mut(id.0) {
            Some(entry) => {
                *entry = Some(task);
                self.pending.insert(position);
                self.in_flight = self.in_flight.saturating_sub(1);
            }
            None => warn!(task_id = %id, "requeue for unknown task ignored"),
        }
    }

    /// Note that a running task reached a terminal status.
    pub fn finish(&mut self, id: TaskId) {
        self.in_flight = self.in_flight.saturating_sub(1);
        debug!(task_id = %id, in_flight = self.in_flight, "task left the queue");
    }

    /// Remove every pending task, in id order.
    pub fn drain_pending(&mut self) -> Vec<Task> {
        self.pending.clear();
        self.tasks.iter_mut().filter_map(Option::take).collect()
    }

    fn not_before(&self, id: TaskId) -> Option<Instant> {
        self.tasks
            .get(id.0)
            .and_then(Option::as_ref)
            .and_then(|task| task.not_before)
    }
}

fn rank(scheduling: Scheduling, task: &Task) -> u8 {
    match scheduling {
        Scheduling::Fifo => 0,
        Scheduling::Priority => u8::MAX - task.spec.priority,
    }
}
