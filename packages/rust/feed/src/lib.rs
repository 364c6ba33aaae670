//! HTTP feed retrieval for Sieve.
//!
//! [`HttpFeed`] downloads a feed URL and parses RSS or Atom into [`Item`]s.

mod parser;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use sieve_shared::{FeedSource, Item, Result, SieveError};
use tracing::{debug, instrument};

pub use parser::parse_feed;

const USER_AGENT: &str = concat!("Sieve/", env!("CARGO_PKG_VERSION"));

/// Fetches feeds over HTTP(S).
pub struct HttpFeed {
    client: Client,
}

impl HttpFeed {
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
impl FeedSource for HttpFeed {
    #[instrument(skip(self), fields(source = %source_name))]
    async fn fetch_items(&self, url: &str, source_name: &str) -> Result<Vec<Item>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SieveError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SieveError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SieveError::Network(format!("{url}: body read failed: {e}")))?;

        let items = parse_feed(&body, source_name)?;
        debug!(count = items.len(), "parsed feed");
        Ok(items)
    }
}
