//! Hacker News front-page adapter (Firebase API).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{RawSourceItem, SourceAdapter};
use crate::error::{IngestError, IngestResult};
use crate::storage::{SourceType, SqliteStorage};

const ADAPTER_NAME: &str = "hackernews";
const DEFAULT_BASE_URL: &str = "https://hacker-news.firebaseio.com";
const FETCH_TIMEOUT_SECS: u64 = 30;
const FEED_KEY: &str = "topstories";
/// Front-page noise floor; stories below this score are dropped unless the
/// source options override it.
const DEFAULT_MIN_SCORE: i64 = 100;
/// Seen-id window; front-page churn is high so this is deliberately large.
const MAX_SEEN_IDS: usize = 5000;
/// Pause between per-story fetches to stay polite to the Firebase API.
const ITEM_FETCH_DELAY_MS: u64 = 100;

#[derive(Debug, Deserialize)]
struct HackerNewsOptions {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    min_score: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Story {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    score: Option<i64>,
    #[serde(default)]
    time: Option<i64>,
}

pub struct HackerNewsAdapter {
    storage: SqliteStorage,
    http: reqwest::Client,
    max_items: usize,
    base_url: String,
    min_score: i64,
}

impl HackerNewsAdapter {
    pub fn new(storage: SqliteStorage, max_items: usize) -> Self {
        Self {
            storage,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            max_items,
            base_url: DEFAULT_BASE_URL.to_string(),
            min_score: DEFAULT_MIN_SCORE,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> IngestResult<T> {
        self.http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IngestError::Fetch {
                adapter: ADAPTER_NAME.to_string(),
                message: format!("{}: {}", url, e),
            })?
            .json()
            .await
            .map_err(|e| IngestError::Fetch {
                adapter: ADAPTER_NAME.to_string(),
                message: format!("{}: {}", url, e),
            })
    }
}

#[async_trait]
impl SourceAdapter for HackerNewsAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn configure(&mut self, options: &serde_json::Value) -> IngestResult<()> {
        if options.is_null() {
            return Ok(());
        }
        let parsed: HackerNewsOptions =
            serde_json::from_value(options.clone()).map_err(|e| IngestError::AdapterConfig {
                adapter: ADAPTER_NAME.to_string(),
                message: format!("Invalid options: {}", e),
            })?;
        if let Some(base_url) = parsed.base_url {
            self.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(min_score) = parsed.min_score {
            self.min_score = min_score;
        }
        Ok(())
    }

    async fn fetch(&mut self) -> IngestResult<Vec<RawSourceItem>> {
        let ids: Vec<i64> = self
            .get_json(&format!("{}/v0/topstories.json", self.base_url))
            .await?;

        let mut seen: Vec<i64> = self
            .storage
            .load_adapter_state(ADAPTER_NAME, FEED_KEY)
            .await?
            .and_then(|v| serde_json::from_value(v["seen_ids"].clone()).ok())
            .unwrap_or_default();
        let seen_set: HashSet<i64> = seen.iter().copied().collect();

        let mut items = Vec::new();
        for id in ids {
            if items.len() >= self.max_items {
                break;
            }
            if seen_set.contains(&id) {
                continue;
            }

            tokio::time::sleep(Duration::from_millis(ITEM_FETCH_DELAY_MS)).await;
            let story: Option<Story> = self
                .get_json(&format!("{}/v0/item/{}.json", self.base_url, id))
                .await?;
            seen.push(id);

            let Some(story) = story else { continue };
            let Some(title) = story.title.filter(|t| !t.trim().is_empty()) else {
                continue;
            };
            if story.score.unwrap_or(0) < self.min_score {
                continue;
            }

            let published_at = story
                .time
                .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0));
            let content = story
                .text
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| title.clone());

            items.push(RawSourceItem {
                source_name: "Hacker News".to_string(),
                source_type: SourceType::Other,
                title,
                content,
                url: story
                    .url
                    .or_else(|| Some(format!("https://news.ycombinator.com/item?id={}", story.id))),
                published_at,
            });
        }

        if seen.len() > MAX_SEEN_IDS {
            seen.drain(..seen.len() - MAX_SEEN_IDS);
        }
        self.storage
            .save_adapter_state(ADAPTER_NAME, FEED_KEY, &json!({ "seen_ids": seen }))
            .await?;

        debug!(count = items.len(), "Fetched Hacker News stories");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use serde_json::json;
    use tempfile::TempDir;

    async fn adapter(dir: &TempDir) -> HackerNewsAdapter {
        let storage = SqliteStorage::new(&DatabaseConfig {
            path: dir.path().join("test.db"),
            max_connections: 1,
        })
        .await
        .unwrap();
        HackerNewsAdapter::new(storage, 10)
    }

    #[tokio::test]
    async fn test_min_score_defaults_to_100() {
        let dir = TempDir::new().unwrap();
        let adapter = adapter(&dir).await;
        assert_eq!(adapter.min_score, 100);
    }

    #[tokio::test]
    async fn test_configure_overrides_min_score() {
        let dir = TempDir::new().unwrap();
        let mut adapter = adapter(&dir).await;
        adapter.configure(&json!({"min_score": 25})).unwrap();
        assert_eq!(adapter.min_score, 25);

        // Absent options keep the default.
        let mut adapter = HackerNewsAdapter::new(adapter.storage.clone(), 10);
        adapter.configure(&json!({})).unwrap();
        assert_eq!(adapter.min_score, DEFAULT_MIN_SCORE);
    }
}
