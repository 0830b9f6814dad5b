//! Order-preserving deduplication by canonical key

use std::collections::HashSet;

use crate::types::{ItemDescriptor, NormalizedReference};

/// Anything that carries a canonical key and can be re-indexed
pub trait Dedupable {
    /// Deduplication identity
    fn dedup_key(&self) -> &str;

    /// Turn into an item at the given 1-based position
    fn into_indexed(self, sequence_index: usize) -> ItemDescriptor;
}

impl Dedupable for NormalizedReference {
    fn dedup_key(&self) -> &str {
        self.canonical_key()
    }

    fn into_indexed(self, sequence_index: usize) -> ItemDescriptor {
        self.into_item(sequence_index)
    }
}

impl Dedupable for ItemDescriptor {
    fn dedup_key(&self) -> &str {
        self.canonical_key()
    }

    fn into_indexed(self, sequence_index: usize) -> ItemDescriptor {
        ItemDescriptor::reindexed(self, sequence_index)
    }
}

/// Drop later duplicates and assign dense 1-based indices
///
/// First occurrence wins and survivors keep their input order. Applying it to its own
/// output returns the same sequence.
pub fn dedup<T: Dedupable>(items: impl IntoIterator<Item = T>) -> Vec<ItemDescriptor> {
    dedup_with_stats(items).0
}

/// Like [`dedup`], also returning how many duplicates were dropped
pub fn dedup_with_stats<T: Dedupable>(
    items: impl IntoIterator<Item = T>,
) -> (Vec<ItemDescriptor>, usize) {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut dropped = 0;

    for item in items {
        if seen.insert(item.dedup_key().to_string()) {
            unique.push(item.into_indexed(unique.len() + 1));
        } else {
            dropped += 1;
        }
    }

    (unique, dropped)
}
