//! Bounded worker pool for one page of events.
//!
//! Every event gets its own task, but a semaphore lets at most
//! `concurrency` of them resolve/download at once. Results come back over a
//! channel in completion order; the consumer side owns all bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use super::executor::{DownloadExecutor, FailureReason, Outcome};
use super::paths::PathResolver;
use crate::ring::Event;

/// Completions of one page, yielded in the order tasks finish.
///
/// Finite and not restartable. Dropping it aborts any task still running.
pub struct PageRun {
    rx: mpsc::Receiver<(Event, Outcome)>,
    throttle: Duration,
    throttle_pending: bool,
    workers: JoinSet<()>,
    /// Event handled by each worker, to report one that panicked.
    tasks: HashMap<Id, Event>,
}

impl PageRun {
    /// Next completed `(event, outcome)`, or `None` once every task is done.
    ///
    /// After a completion that talked to the source, the next one is held
    /// back by the throttle delay. Skips make no remote calls and are not
    /// throttled. A worker that panicked yields a `Failed` outcome once the
    /// others are done.
    pub async fn next(&mut self) -> Option<(Event, Outcome)> {
        let (event, outcome) = match self.rx.recv().await {
            Some(completed) => completed,
            None => self.next_panicked().await?,
        };
        if self.throttle_pending {
            tokio::time::sleep(self.throttle).await;
        }
        self.throttle_pending = !self.throttle.is_zero() && outcome != Outcome::Skipped;
        Some((event, outcome))
    }

    /// Reap finished workers until one that panicked turns up.
    async fn next_panicked(&mut self) -> Option<(Event, Outcome)> {
        while let Some(joined) = self.workers.join_next().await {
            let Err(err) = joined else {
                continue;
            };
            let Some(event) = self.tasks.remove(&err.id()) else {
                continue;
            };
            if err.is_panic() {
                let message = panic_message(err);
                tracing::error!(id = %event.id, "Download worker panicked: {}", message);
                return Some((event, Outcome::Failed(FailureReason::Panicked(message))));
            }
        }
        None
    }
}

fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Dispatch `events` across a pool of `concurrency` workers.
///
/// Tasks that have not started when `shutdown` fires are dropped without an
/// outcome; tasks already attempting run to completion.
pub fn run_page(
    events: Vec<Event>,
    resolver: PathResolver,
    executor: DownloadExecutor,
    concurrency: usize,
    throttle: Duration,
    shutdown: CancellationToken,
) -> PageRun {
    let (tx, rx) = mpsc::channel(events.len().max(1));
    let slots = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut workers = JoinSet::new();
    let mut tasks = HashMap::with_capacity(events.len());

    for event in events {
        let tx = tx.clone();
        let slots = slots.clone();
        let resolver = resolver.clone();
        let executor = executor.clone();
        let shutdown = shutdown.clone();
        let tracked = event.clone();

        let handle = workers.spawn(async move {
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };
            if shutdown.is_cancelled() {
                tracing::debug!(id = %event.id, "Shutdown requested, not starting download");
                return;
            }
            let outcome = process_event(&event, &resolver, &executor).await;
            let _ = tx.send((event, outcome)).await;
        });
        tasks.insert(handle.id(), tracked);
    }

    PageRun {
        rx,
        throttle,
        throttle_pending: false,
        workers,
        tasks,
    }
}

async fn process_event(event: &Event, resolver: &PathResolver, executor: &DownloadExecutor) -> Outcome {
    let (path, exists) = match resolver.resolve(event).await {
        Ok(resolved) => resolved,
        Err(e) => return Outcome::Failed(FailureReason::Filesystem(e.to_string())),
    };
    if exists {
        tracing::debug!(id = %event.id, path = %path.display(), "already archived");
        return Outcome::Skipped;
    }
    executor.download(event, &path).await
}
