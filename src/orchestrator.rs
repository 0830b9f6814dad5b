//! Batch orchestration
//!
//! [`BatchOrchestrator`] drives one batch through its phases:
//!
//! ```text
//! Idle -> Resolving -> Fetching -> Reporting -> Done
//! ```
//!
//! Resolution failures jump straight to `Done` and are returned to the caller. Once items
//! are resolved the batch always produces a [`BatchReport`]; per-item failures end up in the
//! report, never as an error.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::aggregator::ResultAggregator;
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::Fetcher;
use crate::layout::{IndexedLayout, OutputLayout};
use crate::normalize::ReferenceNormalizer;
use crate::pool::{CANCELLED_REASON, WorkerPool};
use crate::resolver::{
    CollectionResolver, EntryLister, FieldExtractor, ReferenceExtractor, Resolution,
};
use crate::types::{
    BatchPhase, BatchReport, CollectionReference, CompletedItem, Event, FetchOutcome,
    OutcomeKind,
};

/// Receives a callback each time an item reaches its terminal outcome
///
/// Called from the single aggregation point, so calls never overlap. Closures of the form
/// `Fn(sequence_index, total, OutcomeKind)` implement this trait.
pub trait ProgressObserver: Send + Sync {
    /// An item finished
    fn on_item_completed(&self, sequence_index: usize, total: usize, outcome: OutcomeKind);
}

impl<F> ProgressObserver for F
where
    F: Fn(usize, usize, OutcomeKind) + Send + Sync,
{
    fn on_item_completed(&self, sequence_index: usize, total: usize, outcome: OutcomeKind) {
        self(sequence_index, total, outcome)
    }
}

/// Resolves a collection, fetches every item with bounded concurrency and reports
///
/// # Example
///
/// ```no_run
/// use playlist_dl::{BatchOrchestrator, Config, YtDlpFetcher, YtDlpLister};
/// use std::sync::Arc;
///
/// # async fn example() -> playlist_dl::Result<()> {
/// let config = Config::default();
/// let lister = Arc::new(YtDlpLister::from_config(&config.tools)?);
/// let fetcher = Arc::new(YtDlpFetcher::from_config(&config.tools)?);
///
/// let orchestrator = BatchOrchestrator::new(config, lister, fetcher)?
///     .with_observer(|index, total, outcome| println!("({index}/{total}) {outcome:?}"));
///
/// let report = orchestrator
///     .run_batch("https://www.youtube.com/playlist?list=PL123".into())
///     .await?;
/// println!("{}", report.summary());
/// # Ok(())
/// # }
/// ```
pub struct BatchOrchestrator {
    config: Arc<Config>,
    lister: Arc<dyn EntryLister>,
    extractor: Arc<dyn ReferenceExtractor>,
    normalizer: Arc<ReferenceNormalizer>,
    fetcher: Arc<dyn Fetcher>,
    layout: Arc<dyn OutputLayout>,
    observer: Option<Arc<dyn ProgressObserver>>,
    phase_tx: watch::Sender<BatchPhase>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl BatchOrchestrator {
    /// Create an orchestrator from a validated configuration
    ///
    /// The reference extractor, normalizer and output layout are built from the config and
    /// can be replaced with the `with_*` methods.
    pub fn new(
        config: Config,
        lister: Arc<dyn EntryLister>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        config.validate()?;

        let normalizer = ReferenceNormalizer::from_config(&config.normalizer)?;
        let extractor = FieldExtractor::from_config(&config.extraction);
        let layout = IndexedLayout::from_config(&config.batch);

        let (phase_tx, _) = watch::channel(BatchPhase::Idle);
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            config: Arc::new(config),
            lister,
            extractor: Arc::new(extractor),
            normalizer: Arc::new(normalizer),
            fetcher,
            layout: Arc::new(layout),
            observer: None,
            phase_tx,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the reference extractor
    pub fn with_extractor(mut self, extractor: Arc<dyn ReferenceExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the reference normalizer
    pub fn with_normalizer(mut self, normalizer: ReferenceNormalizer) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    /// Replace the output layout
    pub fn with_layout(mut self, layout: Arc<dyn OutputLayout>) -> Self {
        self.layout = layout;
        self
    }

    /// Register a progress observer
    pub fn with_observer(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels the running batch
    ///
    /// Cancelling stops workers from starting new items. Attempts already in flight run to
    /// completion and are not retried.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> BatchPhase {
        *self.phase_tx.borrow()
    }

    /// Watch phase transitions
    pub fn watch_phase(&self) -> watch::Receiver<BatchPhase> {
        self.phase_tx.subscribe()
    }

    /// Subscribe to batch events
    ///
    /// Each subscriber receives every event emitted after it subscribed. Slow subscribers
    /// that fall more than 1000 events behind miss the oldest ones.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The active configuration
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Resolve a collection and fetch all of its items
    ///
    /// Returns [`CollectionUnavailable`](crate::Error::CollectionUnavailable) if the
    /// collection cannot be enumerated; no fetch is attempted in that case. Otherwise
    /// returns the report, whatever the per-item outcomes were.
    pub async fn run_batch(&self, collection: CollectionReference) -> Result<BatchReport> {
        let started_at = Utc::now();
        self.set_phase(BatchPhase::Resolving);
        self.emit(Event::Resolving {
            collection: collection.to_string(),
        });

        let resolution = match self.resolver().resolve(&collection).await {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::error!(
                    collection = %collection,
                    error = %e,
                    "Batch aborted during resolution"
                );
                self.set_phase(BatchPhase::Done);
                return Err(e);
            }
        };

        self.execute(resolution, started_at).await
    }

    /// Resolve a mixed list of item and collection references and fetch everything
    ///
    /// Collections that cannot be enumerated are skipped and counted in the report's stats.
    /// Fails only when no reference resolved at all.
    pub async fn run_references(&self, references: &[String]) -> Result<BatchReport> {
        let started_at = Utc::now();
        self.set_phase(BatchPhase::Resolving);
        self.emit(Event::Resolving {
            collection: references.join(", "),
        });

        let resolution = match self.resolver().resolve_references(references).await {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::error!(
                    references = references.len(),
                    error = %e,
                    "Batch aborted during resolution"
                );
                self.set_phase(BatchPhase::Done);
                return Err(e);
            }
        };

        self.execute(resolution, started_at).await
    }

    fn resolver(&self) -> CollectionResolver {
        CollectionResolver::new(
            Arc::clone(&self.lister),
            Arc::clone(&self.extractor),
            Arc::clone(&self.normalizer),
        )
        .expect_non_empty(self.config.batch.expect_non_empty)
    }

    async fn execute(
        &self,
        resolution: Resolution,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<BatchReport> {
        let Resolution { items, stats } = resolution;
        let total = items.len();
        self.emit(Event::Resolved {
            total,
            stats: stats.clone(),
        });

        let pool = match WorkerPool::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.layout),
            self.config.batch.concurrency_limit,
            self.config.retry.clone(),
        ) {
            Ok(pool) => pool
                .with_cancellation(self.cancel.clone())
                .with_events(self.event_tx.clone()),
            Err(e) => {
                self.set_phase(BatchPhase::Done);
                return Err(e);
            }
        };

        self.set_phase(BatchPhase::Fetching);

        let mut aggregator = ResultAggregator::new(total, started_at);
        let mut unstarted = 0usize;
        let (tx, mut rx) = mpsc::unbounded_channel::<CompletedItem>();

        let producer = pool.run_streaming(items, tx);
        let consumer = async {
            while let Some(CompletedItem { item, outcome }) = rx.recv().await {
                if matches!(&outcome, FetchOutcome::Failure { reason, attempts: 0 }
                    if reason == CANCELLED_REASON)
                {
                    unstarted += 1;
                }
                match aggregator.record(item, outcome) {
                    Ok(progress) => {
                        tracing::info!(
                            index = progress.index,
                            completed = progress.completed,
                            total = progress.total,
                            outcome = ?progress.kind,
                            "Item finished"
                        );
                        if let Some(observer) = &self.observer {
                            observer.on_item_completed(
                                progress.index,
                                progress.total,
                                progress.kind,
                            );
                        }
                        self.emit(Event::ItemCompleted {
                            index: progress.index,
                            completed: progress.completed,
                            total: progress.total,
                            kind: progress.kind,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Discarding outcome");
                    }
                }
            }
        };
        tokio::join!(producer, consumer);

        if self.cancel.is_cancelled() {
            aggregator.mark_cancelled();
            tracing::warn!(
                started = total - unstarted,
                unstarted,
                total,
                "Batch cancelled"
            );
            self.emit(Event::BatchCancelled {
                completed: total - unstarted,
                total,
            });
        }

        self.set_phase(BatchPhase::Reporting);
        let report = match aggregator.finalize(stats) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Could not finalize batch report");
                self.set_phase(BatchPhase::Done);
                return Err(e);
            }
        };

        tracing::info!(
            total = report.total,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            status = ?report.status(),
            "Batch finished"
        );
        self.emit(Event::BatchFinished {
            total: report.total,
            succeeded: report.succeeded.len(),
            failed: report.failed.len(),
        });

        self.set_phase(BatchPhase::Done);
        Ok(report)
    }

    fn set_phase(&self, phase: BatchPhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = %previous, to = %phase, "Batch phase changed");
        }
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("phase", &self.phase())
            .field("lister", &self.lister.name())
            .field("fetcher", &self.fetcher.name())
            .field("concurrency_limit", &self.config.batch.concurrency_limit)
            .field("max_attempts", &self.config.retry.max_attempts)
            .finish()
    }
}
