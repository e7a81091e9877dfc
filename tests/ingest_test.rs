use pretty_assertions::assert_eq;
use tempfile::TempDir;

use worldlines::config::IngestConfig;
use worldlines::error::IngestError;
use worldlines::ingest::{ingest_item, IngestStatus, RawSourceItem};
use worldlines::storage::{DedupMethod, SourceType, SqliteStorage};

fn raw_item(title: &str, content: &str) -> RawSourceItem {
    RawSourceItem {
        source_name: "Test Wire".to_string(),
        source_type: SourceType::News,
        title: title.to_string(),
        content: content.to_string(),
        url: Some("https://example.com/a".to_string()),
        published_at: None,
    }
}

async fn storage(dir: &TempDir) -> SqliteStorage {
    let config = worldlines::config::DatabaseConfig {
        path: dir.path().join("test.db"),
        max_connections: 5,
    };
    SqliteStorage::new(&config).await.unwrap()
}

#[tokio::test]
async fn ingesting_same_item_twice_detects_exact_duplicate() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir).await;
    let config = IngestConfig::default();

    let raw = raw_item("Fab expansion announced", "A new fab is planned.");

    let first = ingest_item(&storage, &raw, &config).await.unwrap();
    assert_eq!(first.status, IngestStatus::New);
    assert!(first.duplicate_of.is_none());

    let second = ingest_item(&storage, &raw, &config).await.unwrap();
    assert_eq!(second.status, IngestStatus::Duplicate);
    assert_eq!(second.duplicate_of.as_deref(), Some(first.item_id.as_str()));
    assert_eq!(second.method, Some(DedupMethod::HashExact));

    // One item row, one dedup record.
    assert_eq!(storage.count_items().await.unwrap(), 1);
    let stored = storage.get_item(&first.item_id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Fab expansion announced");
    assert_eq!(stored.source_type, SourceType::News);
    let records = storage.dedup_records_for(&first.item_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method, DedupMethod::HashExact);
}

#[tokio::test]
async fn normalization_variants_share_a_fingerprint() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir).await;
    let config = IngestConfig::default();

    let first = ingest_item(
        &storage,
        &raw_item("Hello   World", "Some  Content"),
        &config,
    )
    .await
    .unwrap();
    assert_eq!(first.status, IngestStatus::New);

    let second = ingest_item(&storage, &raw_item("hello world", "some content"), &config)
        .await
        .unwrap();
    assert_eq!(second.status, IngestStatus::Duplicate);
    assert_eq!(storage.count_items().await.unwrap(), 1);
}

#[tokio::test]
async fn validation_failure_is_terminal_and_persists_nothing() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir).await;
    let config = IngestConfig::default();

    let raw = raw_item("", "");
    let err = ingest_item(&storage, &raw, &config).await.unwrap_err();
    assert!(matches!(err, IngestError::Validation { .. }));
    assert_eq!(storage.count_items().await.unwrap(), 0);
}

#[tokio::test]
async fn similarity_threshold_catches_near_duplicate_titles() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir).await;
    let config = IngestConfig {
        similarity_threshold: 0.6,
        ..Default::default()
    };

    let first = ingest_item(
        &storage,
        &raw_item(
            "Chipmaker announces new fabrication plant in Arizona",
            "Body one.",
        ),
        &config,
    )
    .await
    .unwrap();
    assert_eq!(first.status, IngestStatus::New);

    // Same headline with trivial punctuation difference, different body.
    let second = ingest_item(
        &storage,
        &raw_item(
            "Chipmaker announces new fabrication plant in Arizona.",
            "Body two, different wording.",
        ),
        &config,
    )
    .await
    .unwrap();
    assert_eq!(second.status, IngestStatus::Duplicate);
    assert_eq!(second.method, Some(DedupMethod::ContentSimilarity));
    assert_eq!(storage.count_items().await.unwrap(), 1);
}

#[tokio::test]
async fn exact_duplicate_wins_over_similarity_match() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir).await;
    let config = IngestConfig {
        similarity_threshold: 0.6,
        ..Default::default()
    };

    let raw = raw_item("Fab expansion announced in Arizona", "A new fab is planned.");
    let first = ingest_item(&storage, &raw, &config).await.unwrap();
    assert_eq!(first.status, IngestStatus::New);

    // An identical re-ingest resolves by fingerprint, even though its own
    // title now sits in the similarity window at score 1.0.
    let second = ingest_item(&storage, &raw, &config).await.unwrap();
    assert_eq!(second.status, IngestStatus::Duplicate);
    assert_eq!(second.method, Some(DedupMethod::HashExact));
    assert_eq!(second.duplicate_of.as_deref(), Some(first.item_id.as_str()));

    let records = storage.dedup_records_for(&first.item_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method, DedupMethod::HashExact);
}

#[tokio::test]
async fn similarity_disabled_at_zero_threshold() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir).await;
    let config = IngestConfig::default();
    assert_eq!(config.similarity_threshold, 0.0);

    ingest_item(&storage, &raw_item("Same headline here", "Body one."), &config)
        .await
        .unwrap();
    let second = ingest_item(
        &storage,
        &raw_item("Same headline here!", "Body two."),
        &config,
    )
    .await
    .unwrap();
    assert_eq!(second.status, IngestStatus::New);
    assert_eq!(storage.count_items().await.unwrap(), 2);
}

#[tokio::test]
async fn adapter_state_round_trips() {
    let dir = TempDir::new().unwrap();
    let storage = storage(&dir).await;

    let state = serde_json::json!({"seen_ids": [1, 2, 3]});
    storage
        .save_adapter_state("hackernews", "topstories", &state)
        .await
        .unwrap();
    let loaded = storage
        .load_adapter_state("hackernews", "topstories")
        .await
        .unwrap();
    assert_eq!(loaded, Some(state));

    // Upsert replaces, keyed by (adapter, feed).
    let updated = serde_json::json!({"seen_ids": [4]});
    storage
        .save_adapter_state("hackernews", "topstories", &updated)
        .await
        .unwrap();
    let loaded = storage
        .load_adapter_state("hackernews", "topstories")
        .await
        .unwrap();
    assert_eq!(loaded, Some(updated));

    assert_eq!(
        storage.load_adapter_state("rss", "topstories").await.unwrap(),
        None
    );
}
