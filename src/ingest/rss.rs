//! RSS/Atom feed adapter.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{RawSourceItem, SourceAdapter};
use crate::error::{IngestError, IngestResult};
use crate::storage::{SourceType, SqliteStorage};

const ADAPTER_NAME: &str = "rss";

/// Strip markup from feed summaries; many feeds embed HTML in entry bodies.
/// Tags are dropped, a handful of common entities are unescaped.
fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    // &amp; goes last so already-escaped entities unescape exactly once.
    out.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}
const FETCH_TIMEOUT_SECS: u64 = 30;
/// Seen-id window per feed; oldest ids roll off so state never grows
/// unbounded.
const MAX_SEEN_IDS: usize = 1000;

/// One feed this adapter polls.
#[derive(Debug, Clone, Deserialize)]
struct FeedSpec {
    url: String,
    source_name: String,
    source_type: SourceType,
}

#[derive(Debug, Deserialize)]
struct RssOptions {
    feeds: Vec<FeedSpec>,
}

pub struct RssAdapter {
    storage: SqliteStorage,
    http: reqwest::Client,
    max_items: usize,
    feeds: Vec<FeedSpec>,
}

impl RssAdapter {
    pub fn new(storage: SqliteStorage, max_items: usize) -> Self {
        Self {
            storage,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            max_items,
            feeds: Vec::new(),
        }
    }

    async fn fetch_feed(&self, feed: &FeedSpec) -> IngestResult<Vec<RawSourceItem>> {
        let bytes = self
            .http
            .get(&feed.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IngestError::Fetch {
                adapter: ADAPTER_NAME.to_string(),
                message: format!("{}: {}", feed.url, e),
            })?
            .bytes()
            .await
            .map_err(|e| IngestError::Fetch {
                adapter: ADAPTER_NAME.to_string(),
                message: format!("{}: {}", feed.url, e),
            })?;

        let parsed = feed_rs::parser::parse(&bytes[..]).map_err(|e| IngestError::Fetch {
            adapter: ADAPTER_NAME.to_string(),
            message: format!("Failed to parse feed {}: {}", feed.url, e),
        })?;

        let mut seen: Vec<String> = self
            .storage
            .load_adapter_state(ADAPTER_NAME, &feed.url)
            .await?
            .and_then(|v| serde_json::from_value(v["seen_ids"].clone()).ok())
            .unwrap_or_default();
        let seen_set: HashSet<String> = seen.iter().cloned().collect();

        let mut items = Vec::new();
        for entry in parsed.entries {
            if items.len() >= self.max_items {
                break;
            }
            if seen_set.contains(&entry.id) {
                continue;
            }

            let title = entry
                .title
                .as_ref()
                .map(|t| t.content.clone())
                .unwrap_or_default();
            let content = entry
                .content
                .as_ref()
                .and_then(|c| c.body.as_deref().map(strip_html))
                .or_else(|| entry.summary.as_ref().map(|s| strip_html(&s.content)))
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| title.clone());
            let url = entry.links.first().map(|l| l.href.clone());
            let published = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc));

            if title.trim().is_empty() {
                warn!(feed = %feed.url, entry_id = %entry.id, "Skipping entry without title");
                continue;
            }

            items.push(RawSourceItem {
                source_name: feed.source_name.clone(),
                source_type: feed.source_type,
                title,
                content,
                url,
                published_at: published,
            });
            seen.push(entry.id.clone());
        }

        // Newest ids live at the tail; trim from the front.
        if seen.len() > MAX_SEEN_IDS {
            seen.drain(..seen.len() - MAX_SEEN_IDS);
        }
        self.storage
            .save_adapter_state(ADAPTER_NAME, &feed.url, &json!({ "seen_ids": seen }))
            .await?;

        debug!(feed = %feed.url, count = items.len(), "Fetched feed entries");
        Ok(items)
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn configure(&mut self, options: &serde_json::Value) -> IngestResult<()> {
        let parsed: RssOptions =
            serde_json::from_value(options.clone()).map_err(|e| IngestError::AdapterConfig {
                adapter: ADAPTER_NAME.to_string(),
                message: format!("Invalid options: {}", e),
            })?;
        if parsed.feeds.is_empty() {
            return Err(IngestError::AdapterConfig {
                adapter: ADAPTER_NAME.to_string(),
                message: "at least one feed is required".to_string(),
            });
        }
        self.feeds = parsed.feeds;
        Ok(())
    }

    async fn fetch(&mut self) -> IngestResult<Vec<RawSourceItem>> {
        let mut all = Vec::new();
        let feeds = self.feeds.clone();
        for feed in &feeds {
            // One broken feed fails the whole adapter fetch; the circuit
            // breaker above isolates it from other adapters.
            all.extend(self.fetch_feed(feed).await?);
        }
        Ok(all)
    }
}
