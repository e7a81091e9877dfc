use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// LLM completion service errors (transport level)
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM service unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Ingestion path errors
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed raw item. Terminal for that item - never retried.
    #[error("Invalid raw item: {}", reasons.join("; "))]
    Validation { reasons: Vec<String> },

    #[error("Adapter '{adapter}' misconfigured: {message}")]
    AdapterConfig { adapter: String, message: String },

    #[error("Fetch failed for '{adapter}': {message}")]
    Fetch { adapter: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Notification channel errors
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Telegram API error: {message}")]
    Api { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;
