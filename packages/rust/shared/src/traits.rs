//! Capabilities the pipeline depends on.
//!
//! The pipeline only sees these traits; concrete feeds, inference clients and
//! stores live in their own crates. Cancellation is delivered by dropping the
//! in-flight future, so implementations must not leave half-written state
//! behind an `.await`.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::{Classification, Item, ItemId, ModelTarget};

/// Retrieves the current items of a feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse `url`, tagging every item with `source_name`.
    /// Returns an empty `Vec` when the feed has no entries.
    async fn fetch_items(&self, url: &str, source_name: &str) -> Result<Vec<Item>>;
}

/// Remote classification and summarization.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        target: &ModelTarget,
        title: &str,
        content: &str,
        rules: &str,
        language: &str,
    ) -> Result<Classification>;

    /// Returns an HTML summary of `content`.
    async fn summarize(
        &self,
        target: &ModelTarget,
        title: &str,
        content: &str,
        language: &str,
    ) -> Result<String>;
}

/// Durable item records keyed by [`ItemId`].
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn exists(&self, id: &ItemId) -> Result<bool>;

    /// Insert or replace the full record.
    async fn save_item(&self, item: &Item) -> Result<()>;

    /// Every non-excluded item, newest first. Each call starts a fresh scan;
    /// dropping the stream early releases the cursor.
    fn all_items(&self) -> BoxStream<'_, Result<Item>>;
}

/// A named transform applied to an item before classification.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, item: Item) -> Result<Item>;
}
