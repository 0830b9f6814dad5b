//! Collects item outcomes into the final batch report
//!
//! Only the orchestrator's consumer loop writes to the aggregator, so it is a plain
//! owned value with no interior locking. Outcomes arrive in completion order; the report
//! keeps that order and exposes [`BatchReport::by_sequence`] for submission order.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::types::{
    BatchReport, CompletedItem, FetchOutcome, ItemDescriptor, OutcomeKind, ResolutionStats,
};

/// Progress snapshot returned by [`ResultAggregator::record`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    /// Sequence index of the item just recorded
    pub index: usize,
    /// Items recorded so far
    pub completed: usize,
    /// Items in the batch
    pub total: usize,
    /// Outcome of the item just recorded
    pub kind: OutcomeKind,
}

/// Accumulates exactly one outcome per submitted item
#[derive(Debug)]
pub struct ResultAggregator {
    total: usize,
    started_at: DateTime<Utc>,
    started: Instant,
    seen: HashSet<usize>,
    succeeded: Vec<CompletedItem>,
    failed: Vec<CompletedItem>,
    cancelled: bool,
}

impl ResultAggregator {
    /// Expect `total` outcomes; the elapsed clock starts now
    pub fn new(total: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            total,
            started_at,
            started: Instant::now(),
            seen: HashSet::with_capacity(total),
            succeeded: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
        }
    }

    /// Record the terminal outcome for one item
    ///
    /// Fails if the item was already recorded or if every expected outcome is in.
    pub fn record(&mut self, item: ItemDescriptor, outcome: FetchOutcome) -> Result<Progress> {
        let index = item.sequence_index();
        if self.is_complete() {
            return Err(Error::Other(format!(
                "outcome for item {index} arrived after all {} items were recorded",
                self.total
            )));
        }
        if !self.seen.insert(index) {
            return Err(Error::Other(format!(
                "outcome for item {index} recorded twice"
            )));
        }

        let kind = outcome.kind();
        let completed = CompletedItem { item, outcome };
        match kind {
            OutcomeKind::Success => self.succeeded.push(completed),
            OutcomeKind::Failure => self.failed.push(completed),
        }

        Ok(Progress {
            index,
            completed: self.completed(),
            total: self.total,
            kind,
        })
    }

    /// Mark the batch as interrupted
    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Outcomes recorded so far
    pub fn completed(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Outcomes expected
    pub fn total(&self) -> usize {
        self.total
    }

    /// Whether every expected outcome has been recorded
    pub fn is_complete(&self) -> bool {
        self.completed() == self.total
    }

    /// Build the report; fails unless every item has an outcome
    pub fn finalize(self, stats: ResolutionStats) -> Result<BatchReport> {
        if !self.is_complete() {
            return Err(Error::PrematureFinalize {
                completed: self.completed(),
                total: self.total,
            });
        }

        Ok(BatchReport {
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            elapsed: self.started.elapsed(),
            started_at: self.started_at,
            cancelled: self.cancelled,
            stats,
        })
    }
}
