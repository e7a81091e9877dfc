use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use worldlines::config::{LlmConfig, RequestConfig};
use worldlines::error::LlmError;
use worldlines::llm::LlmClient;

fn client_for(server: &MockServer, max_retries: u32) -> LlmClient {
    let config = LlmConfig {
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
        base_url: server.uri(),
        temperature: 0.0,
    };
    let request = RequestConfig {
        timeout_ms: 5_000,
        max_retries,
        retry_delay_ms: 1,
    };
    LlmClient::new(&config, request).unwrap()
}

#[tokio::test]
async fn complete_returns_first_text_block() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "thinking", "text": ""},
                {"type": "text", "text": "the answer"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 0);
    let text = client.complete("system", "user").await.unwrap();
    assert_eq!(text, "the answer");
}

#[tokio::test]
async fn server_errors_are_retried_then_surfaced_as_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let err = client.complete("system", "user").await.unwrap_err();
    match err {
        LlmError::Unavailable { retries, .. } => assert_eq!(retries, 3),
        other => panic!("Expected Unavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn response_without_text_block_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "tool_use", "text": ""}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 0);
    let err = client.complete("system", "user").await.unwrap_err();
    assert!(matches!(err, LlmError::Unavailable { .. }));
}
