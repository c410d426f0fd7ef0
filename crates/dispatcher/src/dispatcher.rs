//! Worker loop and run lifecycle
//!
//! `Dispatcher::dispatch` builds a fresh slot pool and task queue, spawns one
//! worker per slot and waits for the queue to drain (or for cancellation, or
//! for every credential to die). Workers share nothing but the pool, the
//! queue and the aggregator; each of those is touched in short critical
//! sections and never locked across a network call or a wait.
//!
//! A worker repeats: see whether any task is eligible, lease the
//! lowest-index usable slot, take the next task, drive up to `burst`
//! pagination steps, then release the slot and either finish or requeue the
//! task. Whenever nothing can happen yet it sleeps until the earliest reset
//! or backoff deadline, or until another worker reports progress.

use std::sync::Arc;

use common::Credential;
use credential_pool::{SlotLease, SlotOutcome, SlotPool, Unavailable};
use fetch_client::FetchClient;
use tokio::sync::futures::Notified;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::aggregator::{Aggregator, Halt, Manifest};
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::metrics;
use crate::paginator::{PageOutcome, Paginator};
use crate::queue::{Next, TaskQueue};
use crate::retry::{self, RetryPolicy, TaskAction};
use crate::task::{Task, TaskId, TaskSpec, TaskStatus};

/// Runs task batches against credential pools.
///
/// Holds configuration only. Every `dispatch` call gets its own pool, queue
/// and manifest, so one `Dispatcher` can serve any number of runs, including
/// concurrent ones.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Fetch every task to completion across the given credentials.
    ///
    /// Each credential comes paired with the client that speaks for it.
    /// Duplicate credentials are skipped. Returns an error only for setup
    /// problems (a credential with a zero quota ceiling); everything that
    /// happens during the run is reported on the manifest.
    ///
    /// When `cancel` fires, calls already sent are allowed to finish, no new
    /// task is started and every unfinished task is reported as
    /// `Failed("cancelled")` with the items it had collected.
    pub async fn dispatch(
        &self,
        credentials: Vec<(Credential, Arc<dyn FetchClient>)>,
        tasks: Vec<TaskSpec>,
        cancel: CancellationToken,
    ) -> Result<Manifest> {
        let run_id = Uuid::new_v4();
        let span = info_span!("dispatch", %run_id);
        self.run(run_id, credentials, tasks, cancel)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        run_id: Uuid,
        credentials: Vec<(Credential, Arc<dyn FetchClient>)>,
        tasks: Vec<TaskSpec>,
        cancel: CancellationToken,
    ) -> Result<Manifest> {
        let specs = tasks.clone();
        let queue = TaskQueue::new(tasks, self.config.scheduling);

        let pool = match SlotPool::new(
            credentials,
            self.config.default_quota_ceiling,
            self.config.fallback_window(),
        ) {
            Ok(pool) => pool,
            Err(credential_pool::Error::NoCredentials) => {
                warn!(tasks = specs.len(), "no credentials supplied, nothing can run");
                return Ok(fail_all(queue, run_id));
            }
            Err(e) => return Err(e.into()),
        };

        let workers = pool.len().await;
        info!(
            tasks = specs.len(),
            slots = workers,
            burst = self.config.burst,
            scheduling = ?self.config.scheduling,
            "dispatch started"
        );

        let stop = cancel.child_token();
        let run = Arc::new(Run {
            pool,
            queue: Mutex::new(queue),
            results: Mutex::new(Aggregator::new()),
            policy: RetryPolicy::from_config(&self.config),
            paginator: Paginator::new(self.config.pacing, stop.clone()),
            burst: self.config.burst,
            stop,
            halt: Mutex::new(None),
            progress: Notify::new(),
        });

        let mut join_set = JoinSet::new();
        for worker in 0..workers {
            let run = Arc::clone(&run);
            join_set.spawn(run.worker(worker).in_current_span());
        }
        while let Some(res) = join_set.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "worker ended abnormally");
                run.stop.cancel();
            }
        }

        let mut results = std::mem::take(&mut *run.results.lock().await);
        let mut leftovers = run.queue.lock().await.drain_pending();
        // A task whose worker died mid-drive is in neither place.
        for (i, spec) in specs.into_iter().enumerate() {
            let id = TaskId(i);
            if !results.contains(id) && !leftovers.iter().any(|task| task.id == id) {
                leftovers.push(Task::new(id, spec));
            }
        }

        let halt = run.halt.lock().await.take();
        let halt = halt.or_else(|| {
            (cancel.is_cancelled() && !leftovers.is_empty()).then_some(Halt::Cancelled)
        });
        let reason = match &halt {
            Some(Halt::PoolExhausted(counts)) => format!("pool exhausted: {counts}"),
            Some(Halt::Cancelled) => "cancelled".to_string(),
            None => "worker stopped before the task finished".to_string(),
        };
        for mut task in leftovers {
            finish_task(&mut task, TaskStatus::Failed, Some(reason.clone()));
            results.merge(task);
        }

        let slots = run.pool.report().await;
        let manifest = results.finish(run_id, halt, slots);
        info!(
            completed = manifest.with_status(TaskStatus::Completed).count(),
            partially_completed = manifest.with_status(TaskStatus::PartiallyCompleted).count(),
            failed = manifest.with_status(TaskStatus::Failed).count(),
            halted = manifest.halt.is_some(),
            "dispatch finished"
        );
        Ok(manifest)
    }
}

/// State shared by the workers of one run.
struct Run {
    pool: SlotPool,
    queue: Mutex<TaskQueue>,
    results: Mutex<Aggregator>,
    policy: RetryPolicy,
    paginator: Paginator,
    burst: usize,
    /// Child of the caller's token; also cancelled when the pool dies.
    stop: CancellationToken,
    halt: Mutex<Option<Halt>>,
    /// Signalled whenever a slot is released or a task changes hands.
    progress: Notify,
}

impl Run {
    async fn worker(self: Arc<Self>, worker: usize) {
        debug!(worker, "worker started");
        loop {
            // Registered before looking at any state so a release between
            // the checks below and the wait is not missed.
            let notified = self.progress.notified();

            if self.stop.is_cancelled() {
                break;
            }

            let next = self.queue.lock().await.peek(Instant::now());
            match next {
                Next::Drained => {
                    self.progress.notify_waiters();
                    break;
                }
                Next::Idle => {
                    self.wait(notified, None).await;
                    continue;
                }
                Next::WaitUntil(at) => {
                    self.wait(notified, Some(at)).await;
                    continue;
                }
                Next::Ready => {}
            }

            let lease = match self.pool.acquire().await {
                Ok(lease) => lease,
                Err(Unavailable::AllBusy { next_reset }) => {
                    self.wait(notified, next_reset).await;
                    continue;
                }
                Err(Unavailable::ExhaustedUntil(at)) => {
                    info!(
                        worker,
                        wait_secs = at.saturating_duration_since(Instant::now()).as_secs(),
                        "every usable slot exhausted, waiting for the earliest reset"
                    );
                    self.wait(notified, Some(at)).await;
                    continue;
                }
                Err(Unavailable::AllDead) => {
                    let counts = self.pool.counts().await;
                    error!(%counts, "every credential rejected, halting run");
                    self.halt
                        .lock()
                        .await
                        .get_or_insert(Halt::PoolExhausted(counts));
                    self.stop.cancel();
                    break;
                }
            };

            let task = self.queue.lock().await.take_next(Instant::now());
            match task {
                Some(task) => self.drive(task, lease).await,
                None => self.pool.release(lease, SlotOutcome::Returned).await,
            }
            self.progress.notify_waiters();
        }
        debug!(worker, "worker stopped");
    }

    /// Run up to `burst` pagination steps of `task` on `lease`, then settle
    /// both.
    async fn drive(&self, mut task: Task, mut lease: SlotLease) {
        let kind = task.spec.endpoint.kind();
        debug!(task_id = %task.id, slot = %lease.fingerprint(), endpoint = %kind, "driving task");

        let mut steps = 0;
        loop {
            let outcome = self.paginator.advance(&mut task, &mut lease).await;
            steps += 1;
            metrics::record_fetch(kind, &outcome);

            let others_viable = match &outcome {
                PageOutcome::AuthError(_) => self.pool.has_viable_besides(lease.index()).await,
                _ => true,
            };
            let decision =
                retry::decide(&self.policy, &mut task, &outcome, Instant::now(), others_viable);
            log_outcome(&task, &lease, &outcome);

            match decision.task {
                TaskAction::Continue if steps < self.burst && !self.stop.is_cancelled() => {}
                TaskAction::Continue => {
                    self.pool.release(lease, decision.slot).await;
                    self.queue.lock().await.requeue(task, None);
                    return;
                }
                TaskAction::Requeue { not_before } => {
                    self.pool.release(lease, decision.slot).await;
                    self.queue.lock().await.requeue(task, not_before);
                    return;
                }
                TaskAction::Finish { status, reason } => {
                    self.pool.release(lease, decision.slot).await;
                    let id = task.id;
                    finish_task(&mut task, status, reason);
                    self.results.lock().await.merge(task);
                    self.queue.lock().await.finish(id);
                    return;
                }
            }
        }
    }

    async fn wait(&self, notified: Notified<'_>, until: Option<Instant>) {
        let deadline = async {
            match until {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = notified => {}
            _ = deadline => {}
            _ = self.stop.cancelled() => {}
        }
    }
}

fn log_outcome(task: &Task, lease: &SlotLease, outcome: &PageOutcome) {
    let slot = lease.fingerprint();
    match outcome {
        PageOutcome::Page { .. } | PageOutcome::Exhausted { .. } => {}
        PageOutcome::RateLimited => {
            info!(task_id = %task.id, slot, "rate limited, task handed back");
        }
        PageOutcome::AuthError(msg) => {
            warn!(task_id = %task.id, slot, error = %msg, "credential rejected");
        }
        PageOutcome::TransientError(msg) => {
            warn!(task_id = %task.id, slot, retries = task.retries, error = %msg, "transient failure");
        }
        PageOutcome::Malformed(msg) => {
            warn!(task_id = %task.id, slot, error = %msg, "request rejected as malformed");
        }
        PageOutcome::TargetUnavailable(msg) => {
            info!(task_id = %task.id, slot, reason = %msg, "target not readable");
        }
        PageOutcome::Cancelled => {
            debug!(task_id = %task.id, slot, "cancelled before the call went out");
        }
    }
}

fn finish_task(task: &mut Task, status: TaskStatus, reason: Option<String>) {
    if task.finish(status, reason) {
        metrics::record_task_finished(status);
        info!(
            task_id = %task.id,
            status = %status,
            items = task.items.len(),
            pages = task.pages,
            reason = task.reason.as_deref().unwrap_or(""),
            "task finished"
        );
    }
}

/// Manifest for a run with no credentials: every task Failed.
fn fail_all(mut queue: TaskQueue, run_id: Uuid) -> Manifest {
    let mut results = Aggregator::new();
    for mut task in queue.drain_pending() {
        finish_task(&mut task, TaskStatus::Failed, Some("no credentials".to_string()));
        results.merge(task);
    }
    results.finish(
        run_id,
        Some(Halt::PoolExhausted(Default::default())),
        Vec::new(),
    )
}
