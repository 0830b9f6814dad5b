//! # playlist-dl
//!
//! Batch media fetching for playlists and collections.
//!
//! A collection reference (a playlist URL, or a mixed list of item and playlist URLs) is
//! resolved into a deduplicated, indexed list of items. The items are fetched by a bounded
//! pool of workers with per-item retry, and every outcome ends up in a single
//! [`BatchReport`].
//!
//! ## Design
//!
//! - **Pluggable collaborators** - listing ([`EntryLister`]), fetching ([`Fetcher`]) and
//!   file naming ([`OutputLayout`]) are traits; yt-dlp implementations are provided
//! - **Isolated failures** - a failing item is retried and reported, never aborting the batch
//! - **Event-driven** - consumers subscribe to [`Event`]s or register a [`ProgressObserver`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use playlist_dl::{BatchOrchestrator, Config, YtDlpFetcher, YtDlpLister, run_with_interrupt};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let lister = Arc::new(YtDlpLister::from_config(&config.tools)?);
//!     let fetcher = Arc::new(YtDlpFetcher::from_config(&config.tools)?);
//!     let orchestrator = BatchOrchestrator::new(config, lister, fetcher)?;
//!
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = run_with_interrupt(
//!         orchestrator.cancel_token(),
//!         orchestrator.run_batch("https://www.youtube.com/playlist?list=PL123".into()),
//!     )
//!     .await?;
//!     println!("{}", report.summary());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Outcome collection and report building
pub mod aggregator;
/// Configuration types
pub mod config;
/// Order-preserving deduplication
pub mod dedup;
/// Error types
pub mod error;
/// Fetch capability
pub mod fetcher;
/// Destination naming
pub mod layout;
/// Reference normalization
pub mod normalize;
/// Batch orchestration
pub mod orchestrator;
/// Bounded worker pool
pub mod pool;
/// Collection resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// yt-dlp collaborators
pub mod ytdlp;

// Re-export commonly used types
pub use aggregator::{Progress, ResultAggregator};
pub use config::{Config, MediaFormat, ReferenceKind, ReferenceRule, RetryConfig};
pub use error::{Error, FetchError, Result};
pub use fetcher::Fetcher;
pub use layout::{IndexedLayout, OutputLayout};
pub use normalize::ReferenceNormalizer;
pub use orchestrator::{BatchOrchestrator, ProgressObserver};
pub use pool::WorkerPool;
pub use resolver::{CollectionResolver, EntryLister, FieldExtractor, ReferenceExtractor};
pub use types::{
    BatchPhase, BatchReport, BatchStatus, CollectionReference, CompletedItem, Event,
    FetchOutcome, ItemDescriptor, OutcomeKind, RawEntry, ResolutionStats,
};
pub use ytdlp::{YtDlpFetcher, YtDlpLister};

/// Run a batch future, cancelling it on a termination signal.
///
/// When a signal arrives the token is cancelled and the batch is awaited to completion:
/// workers stop picking up items, attempts in flight finish, and the report marks the
/// batch as cancelled. Once the token is cancelled by anyone else, signals are no longer
/// watched and the batch is simply awaited.
///
/// - **Unix:** SIGTERM and SIGINT, whichever of the two could be registered; Ctrl+C if
///   neither could.
/// - **Windows/other:** Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A listener that cannot be installed never cancels the batch.
///
/// # Example
///
/// ```no_run
/// use playlist_dl::{BatchOrchestrator, run_with_interrupt};
///
/// # async fn example(orchestrator: BatchOrchestrator) -> playlist_dl::Result<()> {
/// let report = run_with_interrupt(
///     orchestrator.cancel_token(),
///     orchestrator.run_batch("https://www.youtube.com/playlist?list=PL123".into()),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_interrupt<F, T>(cancel: CancellationToken, batch: F) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(batch);

    tokio::select! {
        output = &mut batch => return output,
        signal = interrupt_signal() => {
            tracing::warn!(signal, "Cancelling batch, waiting for in-flight items to finish");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {
            tracing::debug!("Batch cancelled, no longer watching for signals");
        }
    }

    batch.await
}

/// Resolves with the name of the first termination signal received
#[cfg(unix)]
async fn interrupt_signal() -> &'static str {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    fn listen(kind: SignalKind, name: &'static str) -> Option<(Signal, &'static str)> {
        signal(kind)
            .map_err(|e| tracing::warn!(error = %e, signal = name, "Signal listener unavailable"))
            .ok()
            .map(|stream| (stream, name))
    }

    async fn next(listener: &mut Option<(Signal, &'static str)>) -> &'static str {
        if let Some((stream, name)) = listener {
            if stream.recv().await.is_some() {
                return *name;
            }
        }
        // Closed or missing streams never fire
        std::future::pending().await
    }

    let mut terminate = listen(SignalKind::terminate(), "SIGTERM");
    let mut interrupt = listen(SignalKind::interrupt(), "SIGINT");

    if terminate.is_none() && interrupt.is_none() {
        return ctrl_c_signal().await;
    }

    tokio::select! {
        name = next(&mut terminate) => name,
        name = next(&mut interrupt) => name,
    }
}

#[cfg(not(unix))]
async fn interrupt_signal() -> &'static str {
    ctrl_c_signal().await
}

async fn ctrl_c_signal() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for Ctrl+C, batch will not react to signals");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
