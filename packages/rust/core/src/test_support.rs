//! In-memory collaborators for pipeline and orchestrator tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use sieve_shared::{
    Classification, Classifier, FeedSource, InterestLevel, Item, ItemId, ItemStore, ModelTarget,
    Plugin, Result, SieveError, SourceConfig,
};

const SUMMARY_PREFIX: &str = "<p>summary of ";

/// An item with a deterministic link, date and description.
pub fn item(source: &str, title: &str) -> Item {
    let slug = title.to_lowercase().replace(' ', "-");
    Item::new(
        source,
        title,
        format!("https://{source}.example.com/{slug}"),
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
    )
    .with_description(format!("about {title}"))
}

pub fn source_config(name: &str) -> SourceConfig {
    SourceConfig {
        name: name.into(),
        url: format!("https://{name}.example.com/feed.xml"),
        ..SourceConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// Feeds keyed by URL. A URL mapped to `None` fails with a network error.
#[derive(Default)]
pub struct FakeFeed {
    feeds: HashMap<String, Option<Vec<Item>>>,
}

impl FakeFeed {
    pub fn with(mut self, url: impl Into<String>, items: Vec<Item>) -> Self {
        self.feeds.insert(url.into(), Some(items));
        self
    }

    pub fn failing(mut self, url: impl Into<String>) -> Self {
        self.feeds.insert(url.into(), None);
        self
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn fetch_items(&self, url: &str, _source_name: &str) -> Result<Vec<Item>> {
        match self.feeds.get(url) {
            Some(Some(items)) => Ok(items.clone()),
            Some(None) => Err(SieveError::Network(format!("{url}: connection refused"))),
            None => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// How the fake classifier answers.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Verdict on title and short text.
    pub phase1: Option<InterestLevel>,
    /// Verdict on a summary; defaults to `phase1`.
    pub phase2: Option<InterestLevel>,
    pub fail_phase1: bool,
    pub fail_phase2: bool,
    pub fail_summarize: bool,
    /// Time each call takes.
    pub latency: Duration,
}

impl Script {
    pub fn phase1(level: InterestLevel) -> Self {
        Self {
            phase1: Some(level),
            ..Self::default()
        }
    }
}

pub struct FakeClassifier {
    script: Script,
    classify_calls: AtomicUsize,
    summarize_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    rules: Mutex<Vec<String>>,
    summarized: Mutex<Vec<String>>,
}

impl FakeClassifier {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            classify_calls: AtomicUsize::new(0),
            summarize_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            rules: Mutex::new(Vec::new()),
            summarized: Mutex::new(Vec::new()),
        }
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn summarize_calls(&self) -> usize {
        self.summarize_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.classify_calls() + self.summarize_calls()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Rule strings seen by `classify`, in call order.
    pub fn seen_rules(&self) -> Vec<String> {
        self.rules.lock().unwrap().clone()
    }

    /// Bodies passed to `summarize`, in call order.
    pub fn summarized_inputs(&self) -> Vec<String> {
        self.summarized.lock().unwrap().clone()
    }

    async fn busy(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.script.latency.is_zero() {
            tokio::time::sleep(self.script.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Classifier for FakeClassifier {
    async fn classify(
        &self,
        _target: &ModelTarget,
        _title: &str,
        content: &str,
        rules: &str,
        _language: &str,
    ) -> Result<Classification> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.rules.lock().unwrap().push(rules.to_owned());
        self.busy().await;

        let phase1 = self.script.phase1.unwrap_or(InterestLevel::Uninterested);
        if content.starts_with(SUMMARY_PREFIX) {
            if self.script.fail_phase2 {
                return Err(SieveError::transient("HTTP 503 from fake"));
            }
            Ok(Classification {
                thought: None,
                level: self.script.phase2.unwrap_or(phase1),
                reason: "phase 2".into(),
            })
        } else {
            if self.script.fail_phase1 {
                return Err(SieveError::permanent("HTTP 400 from fake"));
            }
            Ok(Classification {
                thought: Some("looked at the title".into()),
                level: phase1,
                reason: "phase 1".into(),
            })
        }
    }

    async fn summarize(
        &self,
        _target: &ModelTarget,
        title: &str,
        content: &str,
        _language: &str,
    ) -> Result<String> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        self.summarized.lock().unwrap().push(content.to_owned());
        self.busy().await;

        if self.script.fail_summarize {
            return Err(SieveError::transient("timeout from fake"));
        }
        Ok(format!("{SUMMARY_PREFIX}{title}</p>"))
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<ItemId, Item>>,
}

impl MemoryStore {
    pub fn insert(&self, item: Item) {
        self.items.lock().unwrap().insert(item.id.clone(), item);
    }

    pub fn get(&self, id: &ItemId) -> Option<Item> {
        self.items.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn exists(&self, id: &ItemId) -> Result<bool> {
        Ok(self.items.lock().unwrap().contains_key(id))
    }

    async fn save_item(&self, item: &Item) -> Result<()> {
        self.insert(item.clone());
        Ok(())
    }

    fn all_items(&self) -> BoxStream<'_, Result<Item>> {
        let mut items: Vec<Item> = self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|item| item.interest_level != Some(InterestLevel::Exclude))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        stream::iter(items.into_iter().map(Ok)).boxed()
    }
}

// ---------------------------------------------------------------------------
// Plugins
// ---------------------------------------------------------------------------

/// Appends ` [name]` to the description.
pub struct TagPlugin(pub &'static str);

#[async_trait]
impl Plugin for TagPlugin {
    fn name(&self) -> &str {
        self.0
    }

    async fn execute(&self, mut item: Item) -> Result<Item> {
        item.description.push_str(&format!(" [{}]", self.0));
        Ok(item)
    }
}

pub struct FailingPlugin;

#[async_trait]
impl Plugin for FailingPlugin {
    fn name(&self) -> &str {
        "failing"
    }

    async fn execute(&self, _item: Item) -> Result<Item> {
        Err(SieveError::plugin("failing", "always fails"))
    }
}
