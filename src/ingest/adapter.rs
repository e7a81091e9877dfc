use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{IngestError, IngestResult};
use crate::storage::{SourceType, SqliteStorage};

/// Raw item as emitted by an adapter, before validation and normalization.
/// Ephemeral; never persisted in this form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSourceItem {
    pub source_name: String,
    pub source_type: SourceType,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// A pluggable source fetcher.
///
/// `fetch` must only return items the adapter has not previously observed;
/// each adapter tracks its own watermark or seen-set through the shared
/// adapter_state table, capped to a bounded most-recent window.
#[async_trait]
pub trait SourceAdapter: Send {
    /// Stable adapter name, used as the adapter_state and circuit-breaker key.
    fn name(&self) -> &str;

    /// Apply adapter-specific options from the sources file.
    fn configure(&mut self, options: &serde_json::Value) -> IngestResult<()>;

    /// Fetch previously-unseen items from the source.
    async fn fetch(&mut self) -> IngestResult<Vec<RawSourceItem>>;
}

/// Constructor for one adapter type. Receives the shared storage handle (for
/// adapter state) and the per-source item cap.
pub type AdapterCtor =
    Box<dyn Fn(SqliteStorage, usize) -> Box<dyn SourceAdapter> + Send + Sync>;

/// Name to constructor mapping, populated once at startup and passed by
/// handle into the orchestrator.
pub struct AdapterRegistry {
    ctors: HashMap<String, AdapterCtor>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// Register a registry with the built-in adapter types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("rss", |storage, max_items| {
            Box::new(super::rss::RssAdapter::new(storage, max_items))
        });
        registry.register("hackernews", |storage, max_items| {
            Box::new(super::hackernews::HackerNewsAdapter::new(storage, max_items))
        });
        registry
    }

    pub fn register<F>(&mut self, adapter_type: &str, ctor: F)
    where
        F: Fn(SqliteStorage, usize) -> Box<dyn SourceAdapter> + Send + Sync + 'static,
    {
        self.ctors.insert(adapter_type.to_string(), Box::new(ctor));
        info!(adapter_type, "Registered source adapter");
    }

    /// Build and configure an adapter instance for one source entry.
    /// An unregistered adapter type is a configuration error; the caller
    /// reports and skips it without failing the run.
    pub fn build(
        &self,
        source: &SourceSpec,
        storage: SqliteStorage,
        max_items: usize,
    ) -> IngestResult<Box<dyn SourceAdapter>> {
        let ctor = self.ctors.get(&source.adapter_type).ok_or_else(|| {
            IngestError::AdapterConfig {
                adapter: source.adapter_type.clone(),
                message: "unregistered adapter type".to_string(),
            }
        })?;
        let mut adapter = ctor(storage, max_items);
        adapter.configure(&source.options)?;
        Ok(adapter)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// One entry in the sources file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    #[serde(rename = "type")]
    pub adapter_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub options: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

/// Load the list of configured sources from a JSON file.
pub fn load_sources(path: &std::path::Path) -> IngestResult<Vec<SourceSpec>> {
    let raw = std::fs::read_to_string(path).map_err(|e| IngestError::AdapterConfig {
        adapter: "sources".to_string(),
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&raw).map_err(|e| IngestError::AdapterConfig {
        adapter: "sources".to_string(),
        message: format!("Failed to parse {}: {}", path.display(), e),
    })
}
