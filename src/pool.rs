//! Bounded worker pool
//!
//! A fixed number of worker tasks pull items from a shared FIFO queue. Each worker runs
//! one item at a time through the retry loop around the [`Fetcher`], then sends the
//! item's outcome to the completion channel and pulls the next item. At most
//! `concurrency_limit` fetch attempts are in flight at any instant.
//!
//! Workers are isolated: a failure or panic while handling an item (naming it, fetching
//! it, or backing off between attempts) only affects that item. When the batch is
//! cancelled, workers stop pulling new items and whatever is left in the queue is
//! recorded as a failure with zero attempts, so every submitted item gets exactly one
//! outcome.

use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, FetchError, Result};
use crate::fetcher::Fetcher;
use crate::layout::OutputLayout;
use crate::retry::retry_attempts;
use crate::types::{CompletedItem, Event, FetchOutcome, ItemDescriptor};

/// Reason recorded for items that never started because the batch was cancelled
pub const CANCELLED_REASON: &str = "cancelled before start";

/// Reason recorded for items left in the queue after every worker stopped without a cancel
pub const ABANDONED_REASON: &str = "no worker left to start it";

type PendingQueue = Arc<Mutex<VecDeque<Arc<ItemDescriptor>>>>;

/// Executes fetch tasks with a fixed concurrency cap and per-item retry
#[derive(Clone)]
pub struct WorkerPool {
    fetcher: Arc<dyn Fetcher>,
    layout: Arc<dyn OutputLayout>,
    retry: RetryConfig,
    concurrency_limit: usize,
    cancel: CancellationToken,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl WorkerPool {
    /// Create a pool; `concurrency_limit` and `retry.max_attempts` must be at least 1
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        layout: Arc<dyn OutputLayout>,
        concurrency_limit: usize,
        retry: RetryConfig,
    ) -> Result<Self> {
        if concurrency_limit == 0 {
            return Err(Error::config(
                "batch.concurrency_limit",
                "concurrency limit must be at least 1",
            ));
        }
        if retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "max attempts must be at least 1",
            ));
        }

        Ok(Self {
            fetcher,
            layout,
            retry,
            concurrency_limit,
            cancel: CancellationToken::new(),
            event_tx: None,
        })
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish item-level events on the given channel
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Maximum number of simultaneously running items
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Run every item and collect outcomes in completion order
    pub async fn run_all(&self, items: Vec<ItemDescriptor>) -> Vec<CompletedItem> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let producer = self.run_streaming(items, tx);
        let consumer = async {
            let mut completed = Vec::new();
            while let Some(item) = rx.recv().await {
                completed.push(item);
            }
            completed
        };

        let ((), completed) = tokio::join!(producer, consumer);
        completed
    }

    /// Run every item, sending each outcome to `completions` as soon as it is known
    ///
    /// Returns once every item has an outcome. The sender is dropped on return, so a
    /// consumer reading until the channel closes sees exactly one message per item.
    pub async fn run_streaming(
        &self,
        items: Vec<ItemDescriptor>,
        completions: mpsc::UnboundedSender<CompletedItem>,
    ) {
        let total = items.len();
        if total == 0 {
            tracing::debug!("No items submitted, pool idle");
            return;
        }

        let queue: PendingQueue = Arc::new(Mutex::new(items.into_iter().map(Arc::new).collect()));
        let worker_count = self.concurrency_limit.min(total);

        tracing::info!(
            items = total,
            workers = worker_count,
            max_attempts = self.retry.max_attempts,
            fetcher = self.fetcher.name(),
            "Starting worker pool"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                queue: Arc::clone(&queue),
                fetcher: Arc::clone(&self.fetcher),
                layout: Arc::clone(&self.layout),
                retry: self.retry.clone(),
                cancel: self.cancel.clone(),
                event_tx: self.event_tx.clone(),
                completions: completions.clone(),
                total,
            };
            workers.spawn(worker.run());
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task terminated abnormally");
            }
        }

        // Anything still queued was never started
        let remaining: Vec<Arc<ItemDescriptor>> = queue.lock().await.drain(..).collect();
        if remaining.is_empty() {
            return;
        }
        let reason = if self.cancel.is_cancelled() {
            tracing::warn!(
                unstarted = remaining.len(),
                "Batch cancelled, recording unstarted items"
            );
            CANCELLED_REASON
        } else {
            tracing::error!(
                unstarted = remaining.len(),
                "All workers stopped with items still queued"
            );
            ABANDONED_REASON
        };
        for item in remaining {
            let completed = CompletedItem {
                item: item.as_ref().clone(),
                outcome: FetchOutcome::Failure {
                    reason: reason.to_string(),
                    attempts: 0,
                },
            };
            if completions.send(completed).is_err() {
                break;
            }
        }
    }
}

struct Worker {
    id: usize,
    queue: PendingQueue,
    fetcher: Arc<dyn Fetcher>,
    layout: Arc<dyn OutputLayout>,
    retry: RetryConfig,
    cancel: CancellationToken,
    event_tx: Option<broadcast::Sender<Event>>,
    completions: mpsc::UnboundedSender<CompletedItem>,
    total: usize,
}

impl Worker {
    async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(worker = self.id, "Worker stopping, batch cancelled");
                break;
            }

            let next = {
                let mut queue = self.queue.lock().await;
                queue.pop_front()
            };
            let Some(item) = next else {
                break;
            };

            let outcome = self.guarded_process(&item).await;
            let completed = CompletedItem {
                item: item.as_ref().clone(),
                outcome,
            };
            if self.completions.send(completed).is_err() {
                tracing::warn!(worker = self.id, "Completion receiver dropped, stopping worker");
                break;
            }
        }
    }

    /// Handle one item, turning a panic anywhere in its handling into a failed outcome
    async fn guarded_process(&self, item: &Arc<ItemDescriptor>) -> FetchOutcome {
        let attempts = AtomicU32::new(0);
        match AssertUnwindSafe(self.process(item, &attempts))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = format!("worker panicked: {}", panic_message(panic.as_ref()));
                let attempts = attempts.load(Ordering::SeqCst);
                tracing::error!(
                    worker = self.id,
                    index = item.sequence_index(),
                    attempts,
                    reason = %reason,
                    "Item failed"
                );
                FetchOutcome::Failure { reason, attempts }
            }
        }
    }

    async fn process(&self, item: &Arc<ItemDescriptor>, attempts: &AtomicU32) -> FetchOutcome {
        let index = item.sequence_index();
        let destination = self.layout.output_path(index, item);

        tracing::info!(
            worker = self.id,
            index,
            total = self.total,
            target = item.canonical_key(),
            "Fetching item"
        );
        self.emit(Event::ItemStarted {
            index,
            total: self.total,
            target: item.canonical_key().to_string(),
        });

        let max_attempts = self.retry.max_attempts;
        let result = retry_attempts(
            &self.retry,
            &self.cancel,
            |state| {
                self.emit(Event::ItemRetrying {
                    index,
                    attempt: state.attempts_made,
                    max_attempts,
                    error: state.last_error.clone().unwrap_or_default(),
                });
            },
            |attempt| {
                attempts.store(attempt, Ordering::SeqCst);
                let fetcher = Arc::clone(&self.fetcher);
                let item = Arc::clone(item);
                let destination: PathBuf = destination.clone();
                async move {
                    tracing::debug!(index = item.sequence_index(), attempt, "Fetch attempt");
                    match AssertUnwindSafe(fetcher.fetch(&item, &destination))
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(panic) => Err(FetchError::new(format!(
                            "fetcher panicked: {}",
                            panic_message(panic.as_ref())
                        ))),
                    }
                }
            },
        )
        .await;

        match result {
            Ok((path, attempts)) => {
                tracing::info!(index, attempts, path = %path.display(), "Item fetched");
                FetchOutcome::Success { path }
            }
            Err(state) => {
                let reason = state
                    .last_error
                    .unwrap_or_else(|| CANCELLED_REASON.to_string());
                tracing::error!(
                    index,
                    attempts = state.attempts_made,
                    reason = %reason,
                    "Item failed"
                );
                FetchOutcome::Failure {
                    reason,
                    attempts: state.attempts_made,
                }
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            // No subscribers is fine
            let _ = tx.send(event);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
