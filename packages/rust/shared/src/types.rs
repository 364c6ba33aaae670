//! Core domain types for Sieve feed items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SieveError;

// ---------------------------------------------------------------------------
// ItemId
// ---------------------------------------------------------------------------

/// Stable fingerprint of an item: SHA-256 over its source name and canonical link.
///
/// Used as the primary key in storage and as the idempotency key across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Derive the identity of an item published by `source` at `link`.
    pub fn derive(source: &str, link: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update([0x1f]);
        hasher.update(canonical_link(link).as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap an already-computed fingerprint (e.g. read back from storage).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim whitespace and drop any `#fragment`.
fn canonical_link(link: &str) -> &str {
    let link = link.trim();
    match link.find('#') {
        Some(idx) => &link[..idx],
        None => link,
    }
}

// ---------------------------------------------------------------------------
// InterestLevel
// ---------------------------------------------------------------------------

/// How interesting an item is to the reader, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestLevel {
    Exclude,
    Uninterested,
    Interest,
    HighInterest,
}

impl InterestLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclude => "exclude",
            Self::Uninterested => "uninterested",
            Self::Interest => "interest",
            Self::HighInterest => "high_interest",
        }
    }

    /// Whether items at this level get a summarize/re-classify pass.
    pub fn wants_deep_dive(&self) -> bool {
        *self >= Self::Interest
    }
}

impl std::fmt::Display for InterestLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InterestLevel {
    type Err = SieveError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exclude" => Ok(Self::Exclude),
            "uninterested" => Ok(Self::Uninterested),
            "interest" => Ok(Self::Interest),
            "high_interest" => Ok(Self::HighInterest),
            other => Err(SieveError::parse(format!("unknown interest level: {other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A single feed entry as it moves through the pipeline and into storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Name of the configured source that produced the item.
    pub source: String,
    pub title: String,
    pub link: String,
    /// Short text from the feed.
    #[serde(default)]
    pub description: String,
    /// Full body, when the feed or a plugin supplies it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Generated HTML summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Set by the pipeline before the item is persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interest_level: Option<InterestLevel>,
    #[serde(default)]
    pub reason: String,
    /// Reasoning trace returned by the provider, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl Item {
    /// Build a fresh, unclassified item; the identity is derived from `source` and `link`.
    pub fn new(
        source: impl Into<String>,
        title: impl Into<String>,
        link: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        let source = source.into();
        let link = link.into();
        Self {
            id: ItemId::derive(&source, &link),
            source,
            title: title.into(),
            link,
            description: String::new(),
            content: None,
            summary: None,
            interest_level: None,
            reason: String::new(),
            thought: None,
            published_at,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.content = (!content.is_empty()).then_some(content);
        self
    }

    /// Description, or the full content when the feed left the description empty.
    pub fn short_text(&self) -> &str {
        if self.description.trim().is_empty() {
            self.content.as_deref().unwrap_or_default()
        } else {
            &self.description
        }
    }

    /// Apply a classification verdict.
    pub fn apply(&mut self, verdict: Classification) {
        self.interest_level = Some(verdict.level);
        self.reason = verdict.reason;
        self.thought = verdict.thought;
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Verdict returned by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    pub level: InterestLevel,
    pub reason: String,
}

impl Classification {
    /// Verdict used when the classifier could not produce one.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            thought: None,
            level: InterestLevel::Uninterested,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Supported inference providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    Qwen,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Qwen => "qwen",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.0-flash",
            Self::Qwen => "qwen-plus",
        }
    }

    /// Environment variable conventionally holding this provider's API key.
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::Qwen => "QWEN_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved provider and model for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTarget {
    pub provider: ProviderKind,
    pub model: String,
}
