//! Core types and events for playlist-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ReferenceKind;
use crate::error::{Error, Result};

/// A raw collection entry as produced by an [`EntryLister`](crate::resolver::EntryLister)
///
/// Entries are JSON objects; which fields carry a usable reference is decided by the
/// [`ReferenceExtractor`](crate::resolver::ReferenceExtractor).
pub type RawEntry = serde_json::Map<String, serde_json::Value>;

/// Opaque caller-supplied handle denoting a group of items (e.g., a playlist URL)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionReference(String);

impl CollectionReference {
    /// Wrap a caller-supplied reference
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The reference as supplied
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CollectionReference {
    fn from(reference: &str) -> Self {
        Self::new(reference)
    }
}

impl From<String> for CollectionReference {
    fn from(reference: String) -> Self {
        Self(reference)
    }
}

impl std::fmt::Display for CollectionReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A recognized reference that has not been assigned a position yet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedReference {
    raw_reference: String,
    canonical_key: String,
    kind: ReferenceKind,
}

impl NormalizedReference {
    /// Create a normalized reference; the canonical key must not be empty
    pub fn new(
        raw_reference: impl Into<String>,
        canonical_key: impl Into<String>,
        kind: ReferenceKind,
    ) -> Result<Self> {
        let raw_reference = raw_reference.into();
        let canonical_key = canonical_key.into();
        if canonical_key.trim().is_empty() {
            return Err(Error::InvalidReference {
                reference: raw_reference,
                reason: "canonical key is empty".to_string(),
            });
        }
        Ok(Self {
            raw_reference,
            canonical_key,
            kind,
        })
    }

    /// The reference as supplied
    pub fn raw_reference(&self) -> &str {
        &self.raw_reference
    }

    /// Deduplication identity
    pub fn canonical_key(&self) -> &str {
        &self.canonical_key
    }

    /// Whether the reference denotes an item or a collection
    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }

    pub(crate) fn into_item(self, sequence_index: usize) -> ItemDescriptor {
        ItemDescriptor {
            raw_reference: self.raw_reference,
            canonical_key: self.canonical_key,
            sequence_index,
        }
    }
}

/// One unit of work: a deduplicated reference with its 1-based position
///
/// Fields are read-only once created; workers share descriptors through `Arc`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemDescriptor {
    raw_reference: String,
    canonical_key: String,
    sequence_index: usize,
}

impl ItemDescriptor {
    /// Create a descriptor directly; the key must be non-empty and the index at least 1
    pub fn new(
        raw_reference: impl Into<String>,
        canonical_key: impl Into<String>,
        sequence_index: usize,
    ) -> Result<Self> {
        if sequence_index == 0 {
            return Err(Error::Other("sequence index is 1-based".to_string()));
        }
        Ok(NormalizedReference::new(raw_reference, canonical_key, ReferenceKind::Item)?
            .into_item(sequence_index))
    }

    /// The reference as originally supplied
    pub fn raw_reference(&self) -> &str {
        &self.raw_reference
    }

    /// Deduplication identity, also the target handed to the fetcher
    pub fn canonical_key(&self) -> &str {
        &self.canonical_key
    }

    /// 1-based position in the deduplicated list
    pub fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    pub(crate) fn reindexed(self, sequence_index: usize) -> Self {
        Self {
            sequence_index,
            ..self
        }
    }
}

/// Terminal result of processing one item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// The fetch service produced a file
    Success {
        /// Location of the produced file
        path: PathBuf,
    },
    /// Every attempt failed, or the item was never started because the batch was cancelled
    Failure {
        /// Error description from the last attempt
        reason: String,
        /// Attempts made (0 when cancelled before start)
        attempts: u32,
    },
}

impl FetchOutcome {
    /// Success or failure, without payload
    pub fn kind(&self) -> OutcomeKind {
        match self {
            FetchOutcome::Success { .. } => OutcomeKind::Success,
            FetchOutcome::Failure { .. } => OutcomeKind::Failure,
        }
    }

    /// Whether the item was fetched
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

/// Outcome discriminant passed to progress observers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// Item fetched
    Success,
    /// Item failed
    Failure,
}

/// An outcome paired with the item it belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedItem {
    /// Originating item
    pub item: ItemDescriptor,
    /// What happened to it
    pub outcome: FetchOutcome,
}

/// Counters collected while resolving references into items
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStats {
    /// Raw entries without any usable reference field
    pub skipped_entries: usize,
    /// References no normalizer rule recognized
    pub invalid_references: usize,
    /// Items dropped because an earlier item had the same canonical key
    pub duplicates_dropped: usize,
    /// Collections in a mixed input list that could not be enumerated
    pub unavailable_collections: usize,
}

/// Overall state of a finished batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every item succeeded (including the empty batch)
    Completed,
    /// The batch ran to the end but some items failed
    PartialFailure,
    /// The batch was interrupted; unstarted items are recorded as failures
    Cancelled,
}

/// Final result of a batch run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    /// Number of items submitted
    pub total: usize,
    /// Successful items, in completion order
    pub succeeded: Vec<CompletedItem>,
    /// Failed items, in completion order
    pub failed: Vec<CompletedItem>,
    /// Wall-clock time from the start of fetching to finalization
    pub elapsed: Duration,
    /// When the batch started
    pub started_at: DateTime<Utc>,
    /// Whether the batch was interrupted
    pub cancelled: bool,
    /// Resolution counters
    pub stats: ResolutionStats,
}

impl BatchReport {
    /// Overall status
    pub fn status(&self) -> BatchStatus {
        if self.cancelled {
            BatchStatus::Cancelled
        } else if self.failed.is_empty() {
            BatchStatus::Completed
        } else {
            BatchStatus::PartialFailure
        }
    }

    /// Items in the order they were submitted, regardless of outcome
    pub fn by_sequence(&self) -> Vec<&CompletedItem> {
        let mut all: Vec<&CompletedItem> =
            self.succeeded.iter().chain(self.failed.iter()).collect();
        all.sort_by_key(|c| c.item.sequence_index());
        all
    }

    /// Plain-text summary listing every failure with its reason
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Finished in {:.1}s: {} downloaded / {} failed (of {})",
            self.elapsed.as_secs_f64(),
            self.succeeded.len(),
            self.failed.len(),
            self.total
        );
        if self.cancelled {
            out.push_str(" [cancelled]");
        }
        for completed in &self.failed {
            if let FetchOutcome::Failure { reason, attempts } = &completed.outcome {
                out.push_str(&format!(
                    "\n- ({}) {} -> {} [{} attempt(s)]",
                    completed.item.sequence_index(),
                    completed.item.raw_reference(),
                    reason,
                    attempts
                ));
            }
        }
        out
    }

    /// Persist the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Orchestrator lifecycle phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchPhase {
    /// Holding the collection reference, nothing started
    #[default]
    Idle,
    /// Enumerating and normalizing
    Resolving,
    /// Items are being fetched
    Fetching,
    /// Building the final report
    Reporting,
    /// Terminal
    Done,
}

impl std::fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BatchPhase::Idle => "idle",
            BatchPhase::Resolving => "resolving",
            BatchPhase::Fetching => "fetching",
            BatchPhase::Reporting => "reporting",
            BatchPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Events emitted by the orchestrator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Resolution of a collection started
    Resolving {
        /// Collection being resolved
        collection: String,
    },

    /// References resolved into a deduplicated item list
    Resolved {
        /// Items to fetch
        total: usize,
        /// Resolution counters
        stats: ResolutionStats,
    },

    /// A worker picked up an item
    ItemStarted {
        /// Sequence index of the item
        index: usize,
        /// Items in the batch
        total: usize,
        /// Target handed to the fetcher
        target: String,
    },

    /// An attempt failed and another one follows
    ItemRetrying {
        /// Sequence index of the item
        index: usize,
        /// Attempt that just failed (1-based)
        attempt: u32,
        /// Attempt budget
        max_attempts: u32,
        /// Error from the failed attempt
        error: String,
    },

    /// An item reached its terminal outcome
    ItemCompleted {
        /// Sequence index of the item
        index: usize,
        /// Items completed so far, including this one
        completed: usize,
        /// Items in the batch
        total: usize,
        /// Success or failure
        kind: OutcomeKind,
    },

    /// The batch was interrupted
    BatchCancelled {
        /// Items that had started or finished when cancellation arrived
        completed: usize,
        /// Items in the batch
        total: usize,
    },

    /// The report was finalized
    BatchFinished {
        /// Items in the batch
        total: usize,
        /// Successful items
        succeeded: usize,
        /// Failed items
        failed: usize,
    },
}
