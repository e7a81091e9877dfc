//! Operator notification channel (Telegram Bot API).

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::NotifyConfig;
use crate::error::NotifyError;

const ALERT_PREFIX: &str = "[WORLDLINES ALERT]";
const SEND_TIMEOUT_SECS: u64 = 30;

/// Delivery outcome for one message chunk.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub ok: bool,
    pub message_id: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    result: Option<TelegramMessage>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
}

/// Client for the Telegram Bot API sendMessage endpoint.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
    parse_mode: String,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            parse_mode: config.parse_mode.clone(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        }
    }

    /// Send an ordered list of message chunks, stopping at the first chunk
    /// that fails after retries. Results cover only the attempted chunks.
    pub async fn send_chunks(&self, chunks: &[String]) -> Vec<ChunkResult> {
        let mut results = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let result = self.send_one(chunk).await;
            let failed = !result.ok;
            results.push(result);
            if failed {
                warn!(
                    delivered = results.len() - 1,
                    total = chunks.len(),
                    "Chunk delivery failed, stopping"
                );
                break;
            }
        }
        results
    }

    /// Send one operator alert. Alerts are best-effort and never propagate
    /// errors to the caller; a failed alert must not fail the pipeline.
    pub async fn alert(&self, message: &str) {
        let text = format!("{} {}", ALERT_PREFIX, message);
        let result = self.send_one(&text).await;
        if result.ok {
            info!("Operator alert sent");
        } else {
            error!(
                error = result.error.as_deref().unwrap_or("unknown"),
                "Failed to send operator alert"
            );
        }
    }

    async fn send_one(&self, text: &str) -> ChunkResult {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay =
                    Duration::from_millis(self.retry_delay_ms * (2_u64.pow(attempt - 1)));
                tokio::time::sleep(delay).await;
            }
            match self.send_message(text).await {
                Ok(message_id) => {
                    return ChunkResult {
                        ok: true,
                        message_id: Some(message_id),
                        error: None,
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(attempt, error = %last_error, "sendMessage failed");
                }
            }
        }
        ChunkResult {
            ok: false,
            message_id: None,
            error: Some(last_error),
        }
    }

    async fn send_message(&self, text: &str) -> Result<i64, NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": self.parse_mode,
            }))
            .send()
            .await?;

        let status = response.status();
        let body: TelegramResponse = response.json().await.map_err(NotifyError::Http)?;

        if !status.is_success() || !body.ok {
            return Err(NotifyError::Api {
                message: body
                    .description
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            });
        }

        body.result
            .map(|m| m.message_id)
            .ok_or_else(|| NotifyError::Api {
                message: "response carried no message".to_string(),
            })
    }
}
