//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::path::PathBuf;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use worldlines::config::{
    BackupConfig, Config, DatabaseConfig, IngestConfig, LlmConfig, LogFormat, LoggingConfig,
    NotifyConfig, PipelineConfig, RequestConfig,
};
use worldlines::llm::LlmClient;
use worldlines::notify::Notifier;
use worldlines::pipeline::PipelineCtx;
use worldlines::storage::SqliteStorage;

pub const TEST_BOT_TOKEN: &str = "test-token";

/// Config wired to a temp database and the two mock servers. Retry delays
/// are minimal so failure-path tests stay fast.
pub fn test_config(db_path: PathBuf, llm_url: &str, telegram_url: &str) -> Config {
    Config {
        database: DatabaseConfig {
            path: db_path,
            max_connections: 5,
        },
        llm: LlmConfig {
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            base_url: llm_url.to_string(),
            temperature: 0.0,
        },
        request: RequestConfig {
            timeout_ms: 5_000,
            max_retries: 0,
            retry_delay_ms: 1,
        },
        notify: NotifyConfig {
            bot_token: TEST_BOT_TOKEN.to_string(),
            chat_id: "42".to_string(),
            base_url: telegram_url.to_string(),
            parse_mode: "HTML".to_string(),
            max_retries: 0,
            retry_delay_ms: 1,
        },
        ingest: IngestConfig {
            sources_path: PathBuf::from("/nonexistent/sources.json"),
            max_items_per_source: 50,
            similarity_threshold: 0.0,
            similarity_window_hours: 48,
            similarity_lookback: 200,
        },
        pipeline: PipelineConfig::default(),
        backup: BackupConfig {
            dir: PathBuf::from("/tmp/worldlines-test-backups"),
            retention_days: 7,
            interval_hours: 24,
        },
        logging: LoggingConfig {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        },
    }
}

/// Build a full pipeline context against fresh mock servers and a temp
/// database. Returns the servers so tests can mount expectations.
pub async fn test_ctx(db_path: PathBuf) -> (PipelineCtx, MockServer, MockServer) {
    let llm_server = MockServer::start().await;
    let telegram_server = MockServer::start().await;

    let config = test_config(db_path, &llm_server.uri(), &telegram_server.uri());
    let storage = SqliteStorage::new(&config.database).await.unwrap();
    let llm = LlmClient::new(&config.llm, config.request.clone()).unwrap();
    let notifier = Notifier::new(&config.notify);

    let ctx = PipelineCtx {
        config,
        storage,
        llm,
        notifier,
    };
    (ctx, llm_server, telegram_server)
}

/// Mount a completion endpoint that returns `text` as the message body.
pub async fn mount_completion(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": text}]
        })))
        .mount(server)
        .await;
}

/// Mount a completion endpoint that always fails with a server error.
pub async fn mount_completion_outage(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .mount(server)
        .await;
}

/// Mount a Telegram sendMessage endpoint that accepts everything.
pub async fn mount_telegram_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", TEST_BOT_TOKEN)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": {"message_id": 1}
        })))
        .mount(server)
        .await;
}

/// A classification response that passes schema validation.
pub fn valid_classification_json() -> String {
    json!({
        "dimensions": [
            {"dimension": "compute_and_computational_paradigms", "relevance": "primary"}
        ],
        "change_type": "reinforcing",
        "time_horizon": "medium_term",
        "summary": "A datacenter operator expands capacity in a new region.",
        "importance": "medium",
        "key_entities": ["Example Corp"]
    })
    .to_string()
}

/// An exposure response mapping to a single ticker.
pub fn valid_exposure_json(ticker: &str) -> String {
    json!({
        "exposures": [{
            "ticker": ticker,
            "exposure_type": "direct",
            "business_role": "infrastructure_operator",
            "exposure_strength": "core",
            "confidence": "high",
            "dimensions_implicated": ["compute_and_computational_paradigms"],
            "rationale": "Operates the infrastructure described."
        }],
        "skipped_reason": null
    })
    .to_string()
}
