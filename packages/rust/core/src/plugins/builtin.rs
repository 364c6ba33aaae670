//! Built-in plugins.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use sieve_shared::{Item, Plugin, Result, SieveError};
use tracing::debug;

const USER_AGENT: &str = concat!("Sieve/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// nop
// ---------------------------------------------------------------------------

/// Passes items through unchanged.
pub struct NopPlugin;

#[async_trait]
impl Plugin for NopPlugin {
    fn name(&self) -> &str {
        "nop"
    }

    async fn execute(&self, item: Item) -> Result<Item> {
        Ok(item)
    }
}

// ---------------------------------------------------------------------------
// strip_html
// ---------------------------------------------------------------------------

/// Turns an HTML description into plain text.
pub struct StripHtmlPlugin;

#[async_trait]
impl Plugin for StripHtmlPlugin {
    fn name(&self) -> &str {
        "strip_html"
    }

    async fn execute(&self, mut item: Item) -> Result<Item> {
        item.description = html_to_text(&item.description);
        Ok(item)
    }
}

fn html_to_text(html: &str) -> String {
    static TAG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid regex"));

    let text = TAG_RE.replace_all(html, " ");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// fetch_content
// ---------------------------------------------------------------------------

/// Downloads the item's page and keeps its main text as `content` when it is
/// longer than what the feed supplied.
pub struct FetchContentPlugin {
    client: Client,
}

impl FetchContentPlugin {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| SieveError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Plugin for FetchContentPlugin {
    fn name(&self) -> &str {
        "fetch_content"
    }

    async fn execute(&self, mut item: Item) -> Result<Item> {
        let response = self
            .client
            .get(&item.link)
            .send()
            .await
            .map_err(|e| SieveError::plugin(self.name(), format!("{}: {e}", item.link)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SieveError::plugin(
                self.name(),
                format!("{}: HTTP {status}", item.link),
            ));
        }

        let html = response
            .text()
            .await
            .map_err(|e| SieveError::plugin(self.name(), format!("{}: {e}", item.link)))?;

        let text = extract_main_text(&html);
        let current = item.content.as_deref().map_or(0, |c| c.chars().count());
        if text.chars().count() > current {
            debug!(link = %item.link, chars = text.len(), "replacing content with page text");
            item.content = Some(text);
        }
        Ok(item)
    }
}

/// Visible text of the page's main content container.
fn extract_main_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    // Known content containers in priority order, `body` last.
    let selectors = ["article", "main", "[role=\"main\"]", ".content", "body"];

    for sel_str in &selectors {
        let Ok(selector) = Selector::parse(sel_str) else {
            continue;
        };
        if let Some(el) = doc.select(&selector).next() {
            let mut parts = Vec::new();
            for node in el.descendants() {
                let Some(text) = node.value().as_text() else {
                    continue;
                };
                let hidden = node
                    .parent()
                    .and_then(|p| p.value().as_element().map(|e| e.name().to_owned()))
                    .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));
                if !hidden {
                    parts.extend(text.split_whitespace());
                }
            }
            return parts.join(" ");
        }
    }

    String::new()
}
