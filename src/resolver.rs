//! Collection resolution
//!
//! Expands a collection reference into a deduplicated, indexed item list:
//! 1. One call to the [`EntryLister`] enumerates raw entries
//! 2. The [`ReferenceExtractor`] pulls a usable reference out of each entry
//! 3. The [`ReferenceNormalizer`] turns references into canonical keys
//! 4. [`dedup`](crate::dedup::dedup) drops repeats and assigns indices
//!
//! Entries without a usable reference and references no rule recognizes are skipped and
//! counted; only a failure to enumerate the collection aborts resolution.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{CandidateField, ExtractionConfig, ReferenceKind};
use crate::dedup::dedup_with_stats;
use crate::error::{Error, Result};
use crate::normalize::ReferenceNormalizer;
use crate::types::{
    CollectionReference, ItemDescriptor, NormalizedReference, RawEntry, ResolutionStats,
};

/// Enumerates the raw entries of a collection
///
/// Any error returned here is reported to the caller as [`Error::CollectionUnavailable`].
#[async_trait]
pub trait EntryLister: Send + Sync {
    /// List the entries of a collection, in collection order
    async fn list_entries(&self, collection: &CollectionReference) -> Result<Vec<RawEntry>>;

    /// Implementation name for logging
    fn name(&self) -> &'static str {
        "entry-lister"
    }
}

/// Pulls a usable reference out of a raw entry
///
/// Must be pure and total: returns `None` when the entry has nothing usable.
pub trait ReferenceExtractor: Send + Sync {
    /// Extract a reference from an entry
    fn extract(&self, entry: &RawEntry) -> Option<String>;
}

/// Extractor taking the first non-empty field from a prioritized list
#[derive(Clone, Debug)]
pub struct FieldExtractor {
    fields: Vec<CandidateField>,
}

impl FieldExtractor {
    /// Extractor over the given fields, highest priority first
    pub fn new(fields: Vec<CandidateField>) -> Self {
        Self { fields }
    }

    /// Extractor from configuration
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.candidate_fields.clone())
    }
}

impl ReferenceExtractor for FieldExtractor {
    fn extract(&self, entry: &RawEntry) -> Option<String> {
        self.fields.iter().find_map(|field| {
            let value = match entry.get(&field.name)? {
                serde_json::Value::String(s) => s.trim().to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            if value.is_empty() {
                return None;
            }
            Some(match &field.template {
                Some(template) => template.replace("{value}", &value),
                None => value,
            })
        })
    }
}

/// Items produced by a resolution, with skip counters
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    /// Deduplicated items with dense 1-based indices
    pub items: Vec<ItemDescriptor>,
    /// Skip and drop counters
    pub stats: ResolutionStats,
}

/// Resolves collection references into item lists
#[derive(Clone)]
pub struct CollectionResolver {
    lister: Arc<dyn EntryLister>,
    extractor: Arc<dyn ReferenceExtractor>,
    normalizer: Arc<ReferenceNormalizer>,
    expect_non_empty: bool,
}

impl CollectionResolver {
    /// Create a resolver; empty collections are treated as unavailable by default
    pub fn new(
        lister: Arc<dyn EntryLister>,
        extractor: Arc<dyn ReferenceExtractor>,
        normalizer: Arc<ReferenceNormalizer>,
    ) -> Self {
        Self {
            lister,
            extractor,
            normalizer,
            expect_non_empty: true,
        }
    }

    /// Whether a collection enumerating to zero entries is an error
    pub fn expect_non_empty(mut self, expect: bool) -> Self {
        self.expect_non_empty = expect;
        self
    }

    /// Resolve one collection with exactly one lister call
    pub async fn resolve(&self, collection: &CollectionReference) -> Result<Resolution> {
        let mut stats = ResolutionStats::default();
        let references = self.enumerate(collection, &mut stats).await?;

        let (items, dropped) = dedup_with_stats(references);
        stats.duplicates_dropped = dropped;

        tracing::info!(
            collection = %collection,
            items = items.len(),
            skipped_entries = stats.skipped_entries,
            invalid_references = stats.invalid_references,
            duplicates_dropped = stats.duplicates_dropped,
            "Collection resolved"
        );

        Ok(Resolution { items, stats })
    }

    /// Resolve a mixed list of item and collection references
    ///
    /// Item references are used directly and collection references are expanded; all
    /// resulting items are deduplicated together. A collection that cannot be enumerated
    /// is counted and skipped. Fails with [`Error::CollectionUnavailable`] only when at least
    /// one collection failed and no reference resolved at all.
    pub async fn resolve_references(&self, references: &[String]) -> Result<Resolution> {
        let mut stats = ResolutionStats::default();
        let mut resolved = Vec::new();
        let mut any_resolved = false;

        for raw in references {
            let normalized = match self.normalizer.normalize(raw) {
                Ok(normalized) => normalized,
                Err(e) => {
                    tracing::warn!(reference = %raw, error = %e, "Ignoring reference");
                    stats.invalid_references += 1;
                    continue;
                }
            };

            match normalized.kind() {
                ReferenceKind::Item => {
                    any_resolved = true;
                    resolved.push(normalized);
                }
                ReferenceKind::Collection => {
                    let collection = CollectionReference::new(normalized.canonical_key());
                    match self.enumerate(&collection, &mut stats).await {
                        Ok(mut entries) => {
                            any_resolved = true;
                            resolved.append(&mut entries);
                        }
                        Err(e) => {
                            tracing::warn!(
                                collection = %collection,
                                error = %e,
                                "Skipping collection"
                            );
                            stats.unavailable_collections += 1;
                        }
                    }
                }
            }
        }

        if !any_resolved && stats.unavailable_collections > 0 {
            return Err(Error::CollectionUnavailable {
                collection: references.join(", "),
                reason: format!(
                    "none of the {} references could be resolved",
                    references.len()
                ),
            });
        }

        let (items, dropped) = dedup_with_stats(resolved);
        stats.duplicates_dropped = dropped;

        tracing::info!(
            references = references.len(),
            items = items.len(),
            invalid_references = stats.invalid_references,
            unavailable_collections = stats.unavailable_collections,
            duplicates_dropped = stats.duplicates_dropped,
            "References resolved"
        );

        Ok(Resolution { items, stats })
    }

    async fn enumerate(
        &self,
        collection: &CollectionReference,
        stats: &mut ResolutionStats,
    ) -> Result<Vec<NormalizedReference>> {
        tracing::debug!(
            collection = %collection,
            lister = self.lister.name(),
            "Listing collection entries"
        );

        let entries = self.lister.list_entries(collection).await.map_err(|e| {
            Error::CollectionUnavailable {
                collection: collection.to_string(),
                reason: e.to_string(),
            }
        })?;

        if entries.is_empty() && self.expect_non_empty {
            return Err(Error::CollectionUnavailable {
                collection: collection.to_string(),
                reason: "collection returned no entries".to_string(),
            });
        }

        let mut references = Vec::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            let Some(reference) = self.extractor.extract(entry) else {
                tracing::debug!(position, "Entry has no usable reference");
                stats.skipped_entries += 1;
                continue;
            };

            match self.normalizer.normalize(&reference) {
                Ok(normalized) if normalized.kind() == ReferenceKind::Collection => {
                    tracing::debug!(reference = %reference, "Nested collection entry skipped");
                    stats.skipped_entries += 1;
                }
                Ok(normalized) => references.push(normalized),
                Err(e) => {
                    tracing::debug!(reference = %reference, error = %e, "Entry reference rejected");
                    stats.invalid_references += 1;
                }
            }
        }

        Ok(references)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NormalizerConfig;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(value: serde_json::Value) -> RawEntry {
        value.as_object().cloned().unwrap()
    }

    fn url_entries(urls: &[&str]) -> Vec<RawEntry> {
        urls.iter().map(|u| entry(json!({ "url": u }))).collect()
    }

    #[derive(Default)]
    struct MapLister {
        collections: HashMap<String, Vec<RawEntry>>,
        calls: AtomicUsize,
    }

    impl MapLister {
        fn with(mut self, collection: &str, entries: Vec<RawEntry>) -> Self {
            self.collections.insert(collection.to_string(), entries);
            self
        }
    }

    #[async_trait]
    impl EntryLister for MapLister {
        async fn list_entries(&self, collection: &CollectionReference) -> Result<Vec<RawEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.collections
                .get(collection.as_str())
                .cloned()
                .ok_or_else(|| Error::ExternalTool("playlist does not exist".to_string()))
        }
    }

    fn identity_resolver(lister: Arc<MapLister>) -> CollectionResolver {
        CollectionResolver::new(
            lister,
            Arc::new(FieldExtractor::new(vec![CandidateField::plain("url")])),
            Arc::new(ReferenceNormalizer::identity()),
        )
    }

    #[test]
    fn extractor_uses_first_non_empty_field() {
        let extractor = FieldExtractor::from_config(&ExtractionConfig::default());

        let full = entry(json!({
            "webpage_url": "https://www.youtube.com/watch?v=a",
            "url": "https://other",
            "id": "a"
        }));
        assert_eq!(
            extractor.extract(&full).as_deref(),
            Some("https://www.youtube.com/watch?v=a")
        );

        let id_only = entry(json!({ "webpage_url": "", "url": null, "id": "b" }));
        assert_eq!(
            extractor.extract(&id_only).as_deref(),
            Some("https://www.youtube.com/watch?v=b")
        );

        let nothing = entry(json!({ "title": "deleted video" }));
        assert_eq!(extractor.extract(&nothing), None);
    }

    #[tokio::test]
    async fn resolve_skips_counts_and_dedups() {
        let mut entries = url_entries(&["x", "y", "x", "z"]);
        entries.insert(1, entry(json!({ "title": "no url" })));
        let lister = Arc::new(MapLister::default().with("pl", entries));
        let resolver = identity_resolver(lister.clone());

        let resolution = resolver.resolve(&"pl".into()).await.unwrap();

        let keys: Vec<&str> = resolution
            .items
            .iter()
            .map(|i| i.canonical_key())
            .collect();
        assert_eq!(keys, vec!["x", "y", "z"]);
        assert_eq!(resolution.stats.skipped_entries, 1);
        assert_eq!(resolution.stats.duplicates_dropped, 1);
        assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_entry_references_are_skipped() {
        let lister = Arc::new(MapLister::default().with(
            "pl",
            url_entries(&[
                "https://www.youtube.com/watch?v=a",
                "https://example.com/not-a-video",
                "https://youtu.be/a",
            ]),
        ));
        let resolver = CollectionResolver::new(
            lister,
            Arc::new(FieldExtractor::new(vec![CandidateField::plain("url")])),
            Arc::new(ReferenceNormalizer::from_config(&NormalizerConfig::default()).unwrap()),
        );

        let resolution = resolver.resolve(&"pl".into()).await.unwrap();
        assert_eq!(resolution.items.len(), 1);
        assert_eq!(resolution.stats.invalid_references, 1);
        assert_eq!(resolution.stats.duplicates_dropped, 1);
    }

    #[tokio::test]
    async fn lister_failure_is_collection_unavailable() {
        let resolver = identity_resolver(Arc::new(MapLister::default()));
        let err = resolver.resolve(&"missing".into()).await.unwrap_err();
        match err {
            Error::CollectionUnavailable { collection, reason } => {
                assert_eq!(collection, "missing");
                assert!(reason.contains("playlist does not exist"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_collection_depends_on_expectation() {
        let lister = Arc::new(MapLister::default().with("empty", Vec::new()));

        let strict = identity_resolver(lister.clone());
        assert!(matches!(
            strict.resolve(&"empty".into()).await,
            Err(Error::CollectionUnavailable { .. })
        ));

        let lenient = identity_resolver(lister).expect_non_empty(false);
        let resolution = lenient.resolve(&"empty".into()).await.unwrap();
        assert!(resolution.items.is_empty());
    }

    #[tokio::test]
    async fn mixed_references_expand_collections() {
        let lister = Arc::new(MapLister::default().with(
            "https://www.youtube.com/playlist?list=PL1",
            url_entries(&[
                "https://www.youtube.com/watch?v=b",
                "https://www.youtube.com/watch?v=a",
            ]),
        ));
        let resolver = CollectionResolver::new(
            lister.clone(),
            Arc::new(FieldExtractor::new(vec![CandidateField::plain("url")])),
            Arc::new(ReferenceNormalizer::from_config(&NormalizerConfig::default()).unwrap()),
        );

        let references = vec![
            "https://youtu.be/a".to_string(),
            "https://www.youtube.com/playlist?list=PL1&si=share".to_string(),
            "not a link".to_string(),
            "https://www.youtube.com/playlist?list=GONE".to_string(),
        ];
        let resolution = resolver.resolve_references(&references).await.unwrap();

        let keys: Vec<&str> = resolution
            .items
            .iter()
            .map(|i| i.canonical_key())
            .collect();
        assert_eq!(
            keys,
            vec![
                "https://www.youtube.com/watch?v=a",
                "https://www.youtube.com/watch?v=b"
            ]
        );
        assert_eq!(resolution.stats.invalid_references, 1);
        assert_eq!(resolution.stats.unavailable_collections, 1);
        assert_eq!(resolution.stats.duplicates_dropped, 1);
        assert_eq!(lister.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mixed_references_fail_when_nothing_resolves() {
        let resolver = CollectionResolver::new(
            Arc::new(MapLister::default()),
            Arc::new(FieldExtractor::new(vec![CandidateField::plain("url")])),
            Arc::new(ReferenceNormalizer::from_config(&NormalizerConfig::default()).unwrap()),
        );
        let references = vec!["https://www.youtube.com/playlist?list=GONE".to_string()];
        assert!(matches!(
            resolver.resolve_references(&references).await,
            Err(Error::CollectionUnavailable { .. })
        ));
    }
}
