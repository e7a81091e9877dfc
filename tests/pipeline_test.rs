mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{
    mount_completion, mount_completion_outage, mount_telegram_ok, test_ctx,
    valid_classification_json, TEST_BOT_TOKEN,
};
use worldlines::error::{IngestError, IngestResult};
use worldlines::ingest::{AdapterRegistry, RawSourceItem, SourceAdapter};
use worldlines::pipeline::{run_analysis, run_ingestion};
use worldlines::storage::{NormalizedItem, SourceType};

fn test_item(title: &str) -> NormalizedItem {
    NormalizedItem {
        id: Uuid::new_v4().to_string(),
        title: title.to_string(),
        source_name: "Test Wire".to_string(),
        source_type: SourceType::News,
        timestamp: Utc::now(),
        content: format!("Content for {}", title),
        canonical_link: None,
        ingested_at: Utc::now(),
        dedup_hash: Uuid::new_v4().to_string(),
    }
}

async fn mount_telegram_expect(server: &MockServer, count: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", TEST_BOT_TOKEN)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {"message_id": 1}
        })))
        .expect(count)
        .mount(server)
        .await;
}

#[tokio::test]
async fn retry_budget_exhaustion_removes_item_from_backlog() {
    let dir = TempDir::new().unwrap();
    let (ctx, llm_server, telegram_server) = test_ctx(dir.path().join("test.db")).await;
    mount_telegram_ok(&telegram_server).await;
    // Well-formed HTTP response, unparseable body: consumes retry budget.
    mount_completion(&llm_server, "this is not json").await;

    let item = test_item("Persistent failure");
    ctx.storage.insert_item(&item).await.unwrap();

    for expected_attempts in 1..=3i64 {
        let summary = run_analysis(&ctx).await;
        assert_eq!(summary.found, 1);
        assert_eq!(summary.errored, 1);
        let record = ctx.storage.analysis_error(&item.id).await.unwrap().unwrap();
        assert_eq!(record.attempt_count, expected_attempts);
    }

    // Budget spent: the 4th cycle no longer sees the item.
    let summary = run_analysis(&ctx).await;
    assert_eq!(summary.found, 0);
}

#[tokio::test]
async fn transient_error_halts_batch_without_consuming_budget() {
    let dir = TempDir::new().unwrap();
    let (ctx, llm_server, telegram_server) = test_ctx(dir.path().join("test.db")).await;
    // Exactly one alert for the halt, even with two items pending.
    mount_telegram_expect(&telegram_server, 1).await;
    mount_completion_outage(&llm_server).await;

    let first = test_item("First pending");
    let second = test_item("Second pending");
    ctx.storage.insert_item(&first).await.unwrap();
    ctx.storage.insert_item(&second).await.unwrap();

    let summary = run_analysis(&ctx).await;
    assert_eq!(summary.found, 2);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.errored, 0);
    assert!(summary.halted);

    // Neither item consumed retry budget.
    assert!(ctx.storage.analysis_error(&first.id).await.unwrap().is_none());
    assert!(ctx.storage.analysis_error(&second.id).await.unwrap().is_none());

    // Both items still in the backlog next cycle; with the outage over,
    // the whole batch drains.
    llm_server.reset().await;
    mount_completion(&llm_server, &valid_classification_json()).await;
    let summary = run_analysis(&ctx).await;
    assert_eq!(summary.found, 2);
    assert_eq!(summary.succeeded, 2);
    assert!(!summary.halted);
}

struct FlakyAdapter {
    healthy: Arc<AtomicBool>,
}

#[async_trait]
impl SourceAdapter for FlakyAdapter {
    fn name(&self) -> &str {
        "flaky"
    }

    fn configure(&mut self, _options: &serde_json::Value) -> IngestResult<()> {
        Ok(())
    }

    async fn fetch(&mut self) -> IngestResult<Vec<RawSourceItem>> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(Vec::new())
        } else {
            Err(IngestError::Fetch {
                adapter: "flaky".to_string(),
                message: "connection refused".to_string(),
            })
        }
    }
}

#[tokio::test]
async fn circuit_breaker_alerts_once_per_failure_run() {
    let dir = TempDir::new().unwrap();
    let (mut ctx, _llm_server, telegram_server) = test_ctx(dir.path().join("test.db")).await;

    // Keep the advisory stall check quiet; this test is about the breaker.
    ctx.config.pipeline.stall_min_runs = 1000;
    assert_eq!(ctx.config.pipeline.source_failure_alert_threshold, 3);

    let sources_path = dir.path().join("sources.json");
    std::fs::write(&sources_path, r#"[{"type": "flaky"}]"#).unwrap();
    ctx.config.ingest.sources_path = sources_path;

    let healthy = Arc::new(AtomicBool::new(false));
    let mut registry = AdapterRegistry::new();
    let flag = healthy.clone();
    registry.register("flaky", move |_storage, _max_items| {
        Box::new(FlakyAdapter {
            healthy: flag.clone(),
        })
    });

    // Two full failure runs of 3 fetches each: exactly 2 alerts, both on the
    // third consecutive failure, none on later failures past the threshold.
    mount_telegram_expect(&telegram_server, 2).await;

    for expected_failures in 1..=3i64 {
        run_ingestion(&ctx, &registry).await;
        let record = ctx.storage.source_error("flaky").await.unwrap().unwrap();
        assert_eq!(record.consecutive_failures, expected_failures);
    }

    // A success resets the counter so a fresh run of failures can alert again.
    healthy.store(true, Ordering::SeqCst);
    run_ingestion(&ctx, &registry).await;
    let record = ctx.storage.source_error("flaky").await.unwrap().unwrap();
    assert_eq!(record.consecutive_failures, 0);

    healthy.store(false, Ordering::SeqCst);
    for _ in 0..3 {
        run_ingestion(&ctx, &registry).await;
    }
    let record = ctx.storage.source_error("flaky").await.unwrap().unwrap();
    assert_eq!(record.consecutive_failures, 3);
}

#[tokio::test]
async fn stall_detection_needs_minimum_run_history() {
    let dir = TempDir::new().unwrap();
    let (mut ctx, _llm_server, telegram_server) = test_ctx(dir.path().join("test.db")).await;
    mount_telegram_expect(&telegram_server, 0).await;

    let sources_path = dir.path().join("sources.json");
    std::fs::write(&sources_path, "[]").unwrap();
    ctx.config.ingest.sources_path = sources_path;

    let registry = AdapterRegistry::new();
    // Two runs with zero new items: below the 3-run minimum, no alert.
    run_ingestion(&ctx, &registry).await;
    run_ingestion(&ctx, &registry).await;
}

#[tokio::test]
async fn stall_detection_alerts_when_window_is_dry() {
    let dir = TempDir::new().unwrap();
    let (mut ctx, _llm_server, telegram_server) = test_ctx(dir.path().join("test.db")).await;
    // Alert fires only on the run where history first suffices.
    mount_telegram_expect(&telegram_server, 1).await;

    let sources_path = dir.path().join("sources.json");
    std::fs::write(&sources_path, "[]").unwrap();
    ctx.config.ingest.sources_path = sources_path;
    ctx.config.pipeline.stall_min_runs = 3;
    ctx.config.pipeline.stall_min_items = 1;

    let registry = AdapterRegistry::new();
    for _ in 0..3 {
        run_ingestion(&ctx, &registry).await;
    }

    let runs = ctx.storage.pipeline_runs("ingestion").await.unwrap();
    assert_eq!(runs.len(), 3);
}

#[tokio::test]
async fn unregistered_adapter_type_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let (mut ctx, _llm_server, telegram_server) = test_ctx(dir.path().join("test.db")).await;
    mount_telegram_ok(&telegram_server).await;
    ctx.config.pipeline.stall_min_runs = 1000;

    let sources_path = dir.path().join("sources.json");
    std::fs::write(&sources_path, r#"[{"type": "nonexistent"}]"#).unwrap();
    ctx.config.ingest.sources_path = sources_path;

    let registry = AdapterRegistry::new();
    let summary = run_ingestion(&ctx, &registry).await;
    assert_eq!(summary.sources, 1);
    assert_eq!(summary.sources_skipped, 1);
    assert_eq!(summary.sources_failed, 0);

    // The run still produced its audit row, marked successful.
    let runs = ctx.storage.pipeline_runs("ingestion").await.unwrap();
    assert_eq!(runs.len(), 1);
}
