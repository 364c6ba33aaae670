//! Report generation from stored items.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Serialize;
use sieve_shared::{InterestLevel, Item, ItemStore, Result, SieveError};
use tracing::{debug, info, instrument};

const REPORT_SOURCE_NAME: &str = "Sieve";
const REPORT_SOURCE_URL: &str = "https://github.com/liuerfire/sieve";
const DEFAULT_REPORT_TITLE: &str = "Sieve Aggregated Report";

/// What a generator produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub path: PathBuf,
    pub total_items: usize,
}

/// Renders stored items after a run.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, store: &dyn ItemStore) -> Result<ReportSummary>;
}

// ---------------------------------------------------------------------------
// JSON report
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct JsonReportItem {
    guid: String,
    title: String,
    link: String,
    #[serde(rename = "pubDate")]
    pub_date: String,
    description: String,
}

#[derive(Debug, Serialize)]
struct JsonReportDoc<'a> {
    source_name: &'a str,
    source_url: &'a str,
    source_title: &'a str,
    total_items: usize,
    items: Vec<JsonReportItem>,
}

impl From<Item> for JsonReportItem {
    fn from(item: Item) -> Self {
        let title = match item.interest_level {
            Some(InterestLevel::HighInterest) => format!("⭐⭐ {}", item.title),
            Some(InterestLevel::Interest) => format!("⭐ {}", item.title),
            _ => item.title,
        };
        let description = match item.summary {
            Some(summary) if !summary.is_empty() => summary,
            _ => item.description,
        };
        Self {
            guid: item.id.to_string(),
            title,
            link: item.link,
            pub_date: item.published_at.to_rfc2822(),
            description,
        }
    }
}

/// Writes every non-excluded item, newest first, as one JSON document.
#[derive(Debug, Clone)]
pub struct JsonReport {
    path: PathBuf,
    title: String,
}

impl JsonReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            title: DEFAULT_REPORT_TITLE.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportGenerator for JsonReport {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn generate(&self, store: &dyn ItemStore) -> Result<ReportSummary> {
        let items: Vec<JsonReportItem> = store
            .all_items()
            .map_ok(JsonReportItem::from)
            .try_collect()
            .await?;

        let doc = JsonReportDoc {
            source_name: REPORT_SOURCE_NAME,
            source_url: REPORT_SOURCE_URL,
            source_title: &self.title,
            total_items: items.len(),
            items,
        };
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| SieveError::validation(format!("JSON serialization failed: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SieveError::io(parent, e))?;
        }

        // Write to a sibling temp file, then rename over the target.
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report.json".into());
        let temp = self.path.with_file_name(format!(".{file_name}.tmp"));
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| SieveError::io(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| SieveError::io(&self.path, e))?;
        debug!(temp = %temp.display(), "report renamed into place");

        info!(items = doc.total_items, "JSON report written");
        Ok(ReportSummary {
            path: self.path.clone(),
            total_items: doc.total_items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryStore, item};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sieve-report-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn classified(title: &str, level: InterestLevel, hours_ago: i64) -> Item {
        let mut it = item("src", title);
        it.published_at = Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
            - ChronoDuration::hours(hours_ago);
        it.interest_level = Some(level);
        it
    }

    #[tokio::test]
    async fn writes_items_newest_first_with_markers() {
        let store = MemoryStore::default();
        let mut high = classified("Launch", InterestLevel::HighInterest, 0);
        high.summary = Some("<p>launch summary</p>".into());
        store.insert(high.clone());
        store.insert(classified("Update", InterestLevel::Interest, 1));
        store.insert(classified("Chatter", InterestLevel::Uninterested, 2));
        store.insert(classified("Spam", InterestLevel::Exclude, 3));

        let dir = temp_dir();
        let path = dir.join("out").join("index.json");
        let summary = JsonReport::new(&path).generate(&store).await.expect("report");
        assert_eq!(summary.total_items, 3);
        assert_eq!(summary.path, path);

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["source_name"], "Sieve");
        assert_eq!(doc["source_title"], "Sieve Aggregated Report");
        assert_eq!(doc["total_items"], 3);

        let items = doc["items"].as_array().unwrap();
        let titles: Vec<_> = items.iter().map(|i| i["title"].as_str().unwrap()).collect();
        assert_eq!(titles, ["⭐⭐ Launch", "⭐ Update", "Chatter"]);
        assert_eq!(items[0]["guid"], high.id.as_str());
        assert_eq!(items[0]["description"], "<p>launch summary</p>");
        assert_eq!(items[1]["description"], "about Update");
        assert_eq!(items[0]["pubDate"], "Fri, 14 Mar 2025 12:00:00 +0000");

        assert!(!dir.join("out").join(".index.json.tmp").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn empty_store_writes_empty_report() {
        let dir = temp_dir();
        let path = dir.join("index.json");
        let summary = JsonReport::new(&path)
            .with_title("Morning digest")
            .generate(&MemoryStore::default())
            .await
            .expect("report");
        assert_eq!(summary.total_items, 0);

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["source_title"], "Morning digest");
        assert_eq!(doc["items"], serde_json::json!([]));
        std::fs::remove_dir_all(&dir).ok();
    }
}
