//! Scripted collaborators for driving batches without network access

use async_trait::async_trait;
use playlist_dl::{
    CollectionReference, Config, EntryLister, Error, FetchError, Fetcher, ItemDescriptor, RawEntry,
    Result, RetryConfig,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Lister serving fixed entry lists per collection
#[derive(Default)]
pub struct ScriptedLister {
    collections: HashMap<String, Vec<RawEntry>>,
    calls: AtomicUsize,
}

impl ScriptedLister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collection whose entries carry the given URLs in the `url` field
    pub fn with_urls(mut self, collection: &str, urls: &[&str]) -> Self {
        let entries = urls
            .iter()
            .map(|url| {
                let mut entry = RawEntry::new();
                entry.insert("url".to_string(), serde_json::Value::from(*url));
                entry
            })
            .collect();
        self.collections.insert(collection.to_string(), entries);
        self
    }

    /// Collection with raw entries
    pub fn with_entries(mut self, collection: &str, entries: Vec<RawEntry>) -> Self {
        self.collections.insert(collection.to_string(), entries);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntryLister for ScriptedLister {
    async fn list_entries(&self, collection: &CollectionReference) -> Result<Vec<RawEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.collections
            .get(collection.as_str())
            .cloned()
            .ok_or_else(|| Error::ExternalTool(format!("{collection}: HTTP Error 404")))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// How a scripted item behaves
#[derive(Clone, Debug)]
pub enum Script {
    /// Every attempt fails
    AlwaysFail(String),
    /// The first `n` attempts fail, then it succeeds
    FailTimes(usize),
    /// Every attempt panics
    Panic,
}

/// Fetcher that succeeds unless a key is scripted otherwise, tracking calls and concurrency
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: HashMap<String, Script>,
    delay: Duration,
    calls: Mutex<HashMap<String, usize>>,
    order: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, key: &str, script: Script) -> Self {
        self.scripts.insert(key.to_string(), script);
        self
    }

    /// Time each attempt takes
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    /// Keys in the order attempts started
    pub fn started(&self) -> Vec<String> {
        self.order.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        item: &ItemDescriptor,
        destination: &Path,
    ) -> std::result::Result<PathBuf, FetchError> {
        let key = item.canonical_key().to_string();
        let attempt = {
            let mut calls = self.calls.lock().map_err(|e| FetchError::new(e.to_string()))?;
            let count = calls.entry(key.clone()).or_default();
            *count += 1;
            *count
        };
        if let Ok(mut order) = self.order.lock() {
            order.push(key.clone());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.scripts.get(&key) {
            Some(Script::AlwaysFail(reason)) => Err(FetchError::new(reason.clone())),
            Some(Script::FailTimes(n)) if attempt <= *n => {
                Err(FetchError::new(format!("transient failure {attempt}")))
            }
            Some(Script::Panic) => panic!("fetcher crashed on {key}"),
            _ => Ok(destination.to_path_buf()),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Configuration with immediate retries and a key-based file name
pub fn test_config(output_root: &Path, concurrency_limit: usize, max_attempts: u32) -> Config {
    let mut config = Config::default();
    config.batch.concurrency_limit = concurrency_limit;
    config.batch.output_root = output_root.to_path_buf();
    config.batch.file_name_template = "{index} - {key}".to_string();
    config.retry = RetryConfig::immediate(max_attempts);
    config
}
