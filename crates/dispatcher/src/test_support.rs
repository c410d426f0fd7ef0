//! Scripted API clients for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::Credential;
use credential_pool::SlotPool;
use fetch_client::{Cursor, Endpoint, FetchClient, FetchError, FetchFuture, Page, RateLimit};
use serde_json::{Value, json};

/// One scripted response.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Items and whether more pages follow.
    Page(Vec<Value>, bool),
    PageWithLimit(Vec<Value>, bool, RateLimit),
    RateLimited(Option<Duration>),
    Transient,
    Malformed,
    TargetUnavailable,
    Unauthorized,
}

impl Step {
    pub(crate) fn page(ids: &[i64], more: bool) -> Self {
        Step::Page(ids.iter().map(|id| json!(id)).collect(), more)
    }
}

/// Replays `Step`s in order. The next cursor of the n-th call is `"n"`.
pub(crate) struct ScriptedClient {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    cursors: Mutex<Vec<Option<String>>>,
}

impl ScriptedClient {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
            cursors: Mutex::new(Vec::new()),
        }
    }

    /// Pages of ids; every page but the last says more follow.
    pub(crate) fn pages(pages: &[&[i64]]) -> Self {
        let last = pages.len().saturating_sub(1);
        Self::new(
            pages
                .iter()
                .enumerate()
                .map(|(i, ids)| Step::page(ids, i < last))
                .collect(),
        )
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }
}

impl FetchClient for ScriptedClient {
    fn fetch<'a>(&'a self, _endpoint: &'a Endpoint, cursor: Option<&'a Cursor>) -> FetchFuture<'a> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.cursors
            .lock()
            .unwrap()
            .push(cursor.map(|c| c.as_str().to_string()));
        let step = self.steps.lock().unwrap().pop_front();
        let next = move |more: bool| more.then(|| Cursor::new(n.to_string()));

        Box::pin(async move {
            match step {
                Some(Step::Page(items, more)) => Ok(Page::new(items, next(more))),
                Some(Step::PageWithLimit(items, more, limit)) => {
                    Ok(Page::new(items, next(more)).with_rate_limit(limit))
                }
                Some(Step::RateLimited(reset_after)) => Err(FetchError::RateLimited { reset_after }),
                Some(Step::Transient) => Err(FetchError::Transient("status 503".into())),
                Some(Step::Malformed) => Err(FetchError::Malformed("status 404".into())),
                Some(Step::TargetUnavailable) => {
                    Err(FetchError::TargetUnavailable("Not authorized.".into()))
                }
                Some(Step::Unauthorized) => Err(FetchError::Unauthorized("status 401".into())),
                None => Err(FetchError::Transient("script exhausted".into())),
            }
        })
    }
}

/// Pool with one distinct credential per client.
pub(crate) fn pool_of(clients: Vec<Arc<ScriptedClient>>, ceiling: u32) -> SlotPool {
    let entries = clients
        .into_iter()
        .enumerate()
        .map(|(i, client)| {
            let client: Arc<dyn FetchClient> = client;
            (
                Credential::new(format!("key{i}"), format!("secret{i}")),
                client,
            )
        })
        .collect();
    SlotPool::new(entries, ceiling, Duration::from_secs(900)).unwrap()
}
