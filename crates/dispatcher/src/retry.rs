//! Retry and backoff decisions
//!
//! Turns a `PageOutcome` into what happens next to the task and to the slot.
//! Rate limits never consume a task's retry budget: the slot is suspended
//! and the task goes back to the queue. Transient failures do, with
//! exponential backoff before the task is eligible again.

use std::time::Duration;

use credential_pool::SlotOutcome;
use tokio::time::Instant;

use crate::config::DispatchConfig;
use crate::paginator::PageOutcome;
use crate::task::{Task, TaskStatus};

/// Retry budget and backoff curve. The budget counts retries after the
/// first attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    budget: u32,
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    pub fn new(budget: u32, base: Duration, max: Duration) -> Self {
        Self { budget, base, max }
    }

    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.retry_budget, config.backoff_base(), config.backoff_max())
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Wait before the `attempt`-th retry (1-based): `base * 2^(attempt-1)`,
    /// capped at `max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// What happens to the task after one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Keep paginating on the same slot.
    Continue,
    /// Hand the task back to the queue, eligible again at `not_before`.
    Requeue { not_before: Option<Instant> },
    /// The task is done.
    Finish {
        status: TaskStatus,
        reason: Option<String>,
    },
}

/// Combined verdict for the task and the slot it ran on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub task: TaskAction,
    pub slot: SlotOutcome,
}

impl Decision {
    fn keep_slot(task: TaskAction) -> Self {
        Self {
            task,
            slot: SlotOutcome::Returned,
        }
    }
}

/// Decide the next move after `outcome`.
///
/// `others_viable` says whether any slot besides the current one can still
/// serve calls; it only matters for credential rejection. Consumes one unit
/// of the task's retry budget on transient failures.
pub fn decide(
    policy: &RetryPolicy,
    task: &mut Task,
    outcome: &PageOutcome,
    now: Instant,
    others_viable: bool,
) -> Decision {
    match outcome {
        PageOutcome::Page { .. } => Decision::keep_slot(TaskAction::Continue),
        PageOutcome::Exhausted { .. } => Decision::keep_slot(TaskAction::Finish {
            status: TaskStatus::Completed,
            reason: None,
        }),
        PageOutcome::RateLimited | PageOutcome::Cancelled => {
            Decision::keep_slot(TaskAction::Requeue { not_before: None })
        }
        PageOutcome::TargetUnavailable(msg) => Decision::keep_slot(TaskAction::Finish {
            status: TaskStatus::Completed,
            reason: Some(format!("target unavailable: {msg}")),
        }),
        PageOutcome::Malformed(msg) => Decision::keep_slot(TaskAction::Finish {
            status: TaskStatus::Failed,
            reason: Some(format!("malformed request: {msg}")),
        }),
        PageOutcome::AuthError(msg) => {
            let task_action = if others_viable {
                TaskAction::Requeue { not_before: None }
            } else {
                TaskAction::Finish {
                    status: TaskStatus::Failed,
                    reason: Some(format!(
                        "credential rejected ({msg}) and no usable credentials remain"
                    )),
                }
            };
            Decision {
                task: task_action,
                slot: SlotOutcome::Revoked {
                    reason: msg.clone(),
                },
            }
        }
        PageOutcome::TransientError(msg) => {
            task.retries += 1;
            if task.retries > policy.budget {
                let status = if task.items.is_empty() {
                    TaskStatus::Failed
                } else {
                    TaskStatus::PartiallyCompleted
                };
                Decision::keep_slot(TaskAction::Finish {
                    status,
                    reason: Some(format!(
                        "retry budget of {} exhausted: {msg}",
                        policy.budget
                    )),
                })
            } else {
                let wait = policy.backoff(task.retries);
                Decision::keep_slot(TaskAction::Requeue {
                    not_before: Some(now + wait),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskId, TaskSpec};
    use fetch_client::{Cursor, Endpoint, Page, UserRef};
    use serde_json::json;

    fn policy(budget: u32) -> RetryPolicy {
        RetryPolicy::new(budget, Duration::from_secs(1), Duration::from_secs(60))
    }

    fn task() -> Task {
        Task::new(
            TaskId(0),
            TaskSpec::new(Endpoint::FriendIds {
                user: UserRef::Id(1),
            }),
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(3);
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
        assert_eq!(p.backoff(7), Duration::from_secs(60));
        assert_eq!(p.backoff(200), Duration::from_secs(60));
    }

    #[test]
    fn rate_limit_requeues_without_consuming_budget() {
        let mut t = task();
        let d = decide(&policy(3), &mut t, &PageOutcome::RateLimited, Instant::now(), true);
        assert_eq!(d.task, TaskAction::Requeue { not_before: None });
        assert_eq!(d.slot, SlotOutcome::Returned);
        assert_eq!(t.retries(), 0);
    }

    #[test]
    fn transient_backs_off_until_budget_is_spent() {
        let now = Instant::now();
        let mut t = task();
        let p = policy(2);
        let outcome = PageOutcome::TransientError("503".into());

        let d = decide(&p, &mut t, &outcome, now, true);
        assert_eq!(
            d.task,
            TaskAction::Requeue {
                not_before: Some(now + Duration::from_secs(1))
            }
        );
        let d = decide(&p, &mut t, &outcome, now, true);
        assert_eq!(
            d.task,
            TaskAction::Requeue {
                not_before: Some(now + Duration::from_secs(2))
            }
        );
        let d = decide(&p, &mut t, &outcome, now, true);
        assert!(matches!(
            d.task,
            TaskAction::Finish {
                status: TaskStatus::Failed,
                ..
            }
        ));
    }

    #[test]
    fn zero_budget_allows_only_the_first_attempt() {
        let mut t = task();
        let d = decide(
            &policy(0),
            &mut t,
            &PageOutcome::TransientError("503".into()),
            Instant::now(),
            true,
        );
        assert!(matches!(
            d.task,
            TaskAction::Finish {
                status: TaskStatus::Failed,
                ..
            }
        ));
        assert_eq!(t.retries, 1);
    }

    #[test]
    fn spent_budget_with_items_is_partial() {
        let mut t = task();
        t.absorb(Page::new(vec![json!(1)], Some(Cursor::new("2"))));
        let d = decide(
            &policy(0),
            &mut t,
            &PageOutcome::TransientError("timeout".into()),
            Instant::now(),
            true,
        );
        let TaskAction::Finish { status, reason } = d.task else {
            panic!("expected finish");
        };
        assert_eq!(status, TaskStatus::PartiallyCompleted);
        assert!(reason.unwrap().contains("timeout"));
    }

    #[test]
    fn auth_error_retires_slot_and_requeues() {
        let mut t = task();
        let d = decide(
            &policy(3),
            &mut t,
            &PageOutcome::AuthError("invalid token".into()),
            Instant::now(),
            true,
        );
        assert_eq!(d.task, TaskAction::Requeue { not_before: None });
        assert_eq!(
            d.slot,
            SlotOutcome::Revoked {
                reason: "invalid token".into()
            }
        );
        assert_eq!(t.retries(), 0);
    }

    #[test]
    fn auth_error_on_last_slot_fails_task() {
        let mut t = task();
        let d = decide(
            &policy(3),
            &mut t,
            &PageOutcome::AuthError("revoked".into()),
            Instant::now(),
            false,
        );
        assert!(matches!(
            d.task,
            TaskAction::Finish {
                status: TaskStatus::Failed,
                ..
            }
        ));
        assert!(matches!(d.slot, SlotOutcome::Revoked { .. }));
    }

    #[test]
    fn malformed_fails_without_retry() {
        let mut t = task();
        let d = decide(
            &policy(3),
            &mut t,
            &PageOutcome::Malformed("status 404".into()),
            Instant::now(),
            true,
        );
        assert!(matches!(
            d.task,
            TaskAction::Finish {
                status: TaskStatus::Failed,
                ..
            }
        ));
        assert_eq!(t.retries(), 0);
    }

    #[test]
    fn unavailable_target_completes_with_reason() {
        let mut t = task();
        let d = decide(
            &policy(3),
            &mut t,
            &PageOutcome::TargetUnavailable("Not authorized.".into()),
            Instant::now(),
            true,
        );
        let TaskAction::Finish { status, reason } = d.task else {
            panic!("expected finish");
        };
        assert_eq!(status, TaskStatus::Completed);
        assert!(reason.unwrap().starts_with("target unavailable"));
    }

    #[test]
    fn page_continues_and_last_page_completes() {
        let mut t = task();
        let now = Instant::now();
        let p = policy(3);
        assert_eq!(
            decide(&p, &mut t, &PageOutcome::Page { items: 3 }, now, true).task,
            TaskAction::Continue
        );
        assert_eq!(
            decide(&p, &mut t, &PageOutcome::Exhausted { items: 0 }, now, true).task,
            TaskAction::Finish {
                status: TaskStatus::Completed,
                reason: None
            }
        );
    }
}
