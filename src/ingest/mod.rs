//! Normalization and ingestion: validates raw items, assigns identity,
//! resolves duplicates against the dedup engine, and persists new items.

mod adapter;
pub mod hackernews;
pub mod rss;

pub use adapter::{load_sources, AdapterCtor, AdapterRegistry, RawSourceItem, SourceAdapter, SourceSpec};

use chrono::{Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::dedup;
use crate::error::{IngestError, IngestResult};
use crate::storage::{DedupMethod, InsertOutcome, NormalizedItem, SqliteStorage};

/// Whether an ingested item was new or resolved to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    New,
    Duplicate,
}

/// Result of ingesting one raw item.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    /// The new item's id when status is New.
    pub item_id: String,
    /// The canonical item this raw item duplicated, when status is Duplicate.
    pub duplicate_of: Option<String>,
    pub method: Option<DedupMethod>,
}

/// Validate a raw item. Failure is terminal for that item, never retried.
fn validate(raw: &RawSourceItem) -> IngestResult<()> {
    let mut reasons = Vec::new();

    if raw.title.trim().is_empty() {
        reasons.push("title is required".to_string());
    }
    if raw.source_name.trim().is_empty() {
        reasons.push("source_name is required".to_string());
    }
    if raw.content.trim().is_empty() {
        reasons.push("content is required".to_string());
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(IngestError::Validation { reasons })
    }
}

/// Ingest one raw item: validate, fingerprint, resolve duplicates, persist.
///
/// The exact-match path relies on the store's uniqueness constraint on
/// dedup_hash as the backstop, so two concurrent ingests of the same
/// fingerprint cannot both return New.
pub async fn ingest_item(
    storage: &SqliteStorage,
    raw: &RawSourceItem,
    config: &IngestConfig,
) -> IngestResult<IngestOutcome> {
    validate(raw)?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let dedup_hash = dedup::fingerprint(&raw.title, &raw.source_name, &raw.content);

    // Exact-hash resolution first; an identical item must resolve to the
    // fingerprint's canonical item, never to a similar-titled neighbor.
    if let Some(existing_id) = storage.find_item_id_by_hash(&dedup_hash).await? {
        storage
            .insert_dedup_record(&existing_id, &[id.clone()], DedupMethod::HashExact)
            .await?;
        debug!(duplicate_of = %existing_id, "Exact-hash duplicate detected");
        return Ok(IngestOutcome {
            status: IngestStatus::Duplicate,
            item_id: id,
            duplicate_of: Some(existing_id),
            method: Some(DedupMethod::HashExact),
        });
    }

    if config.similarity_threshold > 0.0 {
        if let Some(existing_id) = find_similar(storage, &raw.title, config).await? {
            storage
                .insert_dedup_record(&existing_id, &[id.clone()], DedupMethod::ContentSimilarity)
                .await?;
            debug!(duplicate_of = %existing_id, "Similarity duplicate detected");
            return Ok(IngestOutcome {
                status: IngestStatus::Duplicate,
                item_id: id,
                duplicate_of: Some(existing_id),
                method: Some(DedupMethod::ContentSimilarity),
            });
        }
    }

    let item = NormalizedItem {
        id: id.clone(),
        title: raw.title.trim().to_string(),
        source_name: raw.source_name.trim().to_string(),
        source_type: raw.source_type,
        timestamp: raw.published_at.unwrap_or(now),
        content: raw.content.trim().to_string(),
        canonical_link: raw.url.clone(),
        ingested_at: now,
        dedup_hash,
    };

    match storage.insert_item(&item).await? {
        InsertOutcome::Inserted => {
            info!(item_id = %item.id, source = %item.source_name, "Ingested new item");
            Ok(IngestOutcome {
                status: IngestStatus::New,
                item_id: item.id,
                duplicate_of: None,
                method: None,
            })
        }
        InsertOutcome::DuplicateHash { existing_id } => {
            storage
                .insert_dedup_record(&existing_id, &[item.id.clone()], DedupMethod::HashExact)
                .await?;
            debug!(duplicate_of = %existing_id, "Exact-hash duplicate detected");
            Ok(IngestOutcome {
                status: IngestStatus::Duplicate,
                item_id: item.id,
                duplicate_of: Some(existing_id),
                method: Some(DedupMethod::HashExact),
            })
        }
    }
}

/// Compare the candidate title against recently ingested titles; first match
/// at or above the threshold wins.
async fn find_similar(
    storage: &SqliteStorage,
    title: &str,
    config: &IngestConfig,
) -> IngestResult<Option<String>> {
    let cutoff = Utc::now() - Duration::hours(config.similarity_window_hours);
    let recent = storage
        .recent_item_titles(cutoff, config.similarity_lookback)
        .await?;

    for (existing_id, existing_title) in recent {
        let score = dedup::title_similarity(title, &existing_title);
        if score >= config.similarity_threshold {
            return Ok(Some(existing_id));
        }
    }
    Ok(None)
}
