use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub request: RequestConfig,
    pub notify: NotifyConfig,
    pub ingest: IngestConfig,
    pub pipeline: PipelineConfig,
    pub backup: BackupConfig,
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// LLM completion service configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
}

/// Outbound HTTP request configuration (transport-level retry policy)
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Notification channel (Telegram Bot API) configuration
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub base_url: String,
    pub parse_mode: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Ingestion and deduplication configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub sources_path: PathBuf,
    pub max_items_per_source: usize,
    /// Similarity dedup is disabled when 0.0
    pub similarity_threshold: f64,
    pub similarity_window_hours: i64,
    pub similarity_lookback: i64,
}

/// Pipeline orchestrator configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fetch_interval_minutes: u64,
    pub max_stage_attempts: i64,
    pub exposure_max_per_run: i64,
    pub analysis_version: String,
    pub mapping_version: String,
    pub synthesis_version: String,
    pub source_failure_alert_threshold: i64,
    pub stall_window_hours: i64,
    pub stall_min_runs: usize,
    pub stall_min_items: i64,
    pub link_window_days: i64,
    pub cluster_min_items: usize,
}

/// Database backup configuration
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub dir: PathBuf,
    pub retention_days: i64,
    pub interval_hours: u64,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

fn required(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Config {
        message: format!("{} is required", name),
    })
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Reads a `.env` file if present (local development), then validates
    /// that the required variables are set.
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(required("DATABASE_PATH")?),
            max_connections: parsed("DATABASE_MAX_CONNECTIONS", 5),
        };

        let llm = LlmConfig {
            api_key: required("LLM_API_KEY")?,
            model: required("LLM_MODEL")?,
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
            temperature: parsed("LLM_TEMPERATURE", 0.0),
        };

        let request = RequestConfig {
            timeout_ms: parsed("REQUEST_TIMEOUT_MS", 60_000),
            max_retries: parsed("MAX_RETRIES", 3),
            retry_delay_ms: parsed("RETRY_DELAY_MS", 1000),
        };

        let notify = NotifyConfig {
            bot_token: required("TELEGRAM_BOT_TOKEN")?,
            chat_id: required("TELEGRAM_CHAT_ID")?,
            base_url: env::var("TELEGRAM_BASE_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            parse_mode: env::var("TELEGRAM_PARSE_MODE").unwrap_or_else(|_| "HTML".to_string()),
            max_retries: parsed("TELEGRAM_MAX_RETRIES", 3),
            retry_delay_ms: parsed("TELEGRAM_RETRY_DELAY_MS", 1000),
        };

        let ingest = IngestConfig {
            sources_path: PathBuf::from(
                env::var("SOURCES_CONFIG_PATH")
                    .unwrap_or_else(|_| "./config/sources.json".to_string()),
            ),
            max_items_per_source: parsed("MAX_ITEMS_PER_SOURCE", 50),
            similarity_threshold: parsed("SIMILARITY_THRESHOLD", 0.0),
            similarity_window_hours: parsed("SIMILARITY_WINDOW_HOURS", 48),
            similarity_lookback: parsed("SIMILARITY_LOOKBACK", 200),
        };

        let pipeline = PipelineConfig {
            fetch_interval_minutes: parsed("FETCH_INTERVAL_MINUTES", 60),
            max_stage_attempts: parsed("MAX_STAGE_ATTEMPTS", 3),
            exposure_max_per_run: parsed("EXPOSURE_MAX_PER_RUN", 20),
            analysis_version: env::var("ANALYSIS_VERSION").unwrap_or_else(|_| "v1".to_string()),
            mapping_version: env::var("EXPOSURE_MAPPING_VERSION")
                .unwrap_or_else(|_| "v1".to_string()),
            synthesis_version: env::var("CLUSTER_SYNTHESIS_VERSION")
                .unwrap_or_else(|_| "v1".to_string()),
            source_failure_alert_threshold: parsed("SOURCE_FAILURE_ALERT_THRESHOLD", 3),
            stall_window_hours: parsed("INGESTION_STALL_HOURS", 24),
            stall_min_runs: parsed("INGESTION_STALL_MIN_RUNS", 3),
            stall_min_items: parsed("INGESTION_STALL_MIN_ITEMS", 1),
            link_window_days: parsed("LINK_WINDOW_DAYS", 90),
            cluster_min_items: parsed("CLUSTER_MIN_ITEMS", 2),
        };

        let backup = BackupConfig {
            dir: PathBuf::from(env::var("BACKUP_DIR").unwrap_or_else(|_| "/data/backups".to_string())),
            retention_days: parsed("BACKUP_RETENTION_DAYS", 7),
            interval_hours: parsed("BACKUP_INTERVAL_HOURS", 24),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "json".to_string())
                .to_lowercase()
                .as_str()
            {
                "pretty" => LogFormat::Pretty,
                _ => LogFormat::Json,
            },
        };

        Ok(Config {
            database,
            llm,
            request,
            notify,
            ingest,
            pipeline,
            backup,
            logging,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sources_path: PathBuf::from("./config/sources.json"),
            max_items_per_source: 50,
            similarity_threshold: 0.0,
            similarity_window_hours: 48,
            similarity_lookback: 200,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_interval_minutes: 60,
            max_stage_attempts: 3,
            exposure_max_per_run: 20,
            analysis_version: "v1".to_string(),
            mapping_version: "v1".to_string(),
            synthesis_version: "v1".to_string(),
            source_failure_alert_threshold: 3,
            stall_window_hours: 24,
            stall_min_runs: 3,
            stall_min_items: 1,
            link_window_days: 90,
            cluster_min_items: 2,
        }
    }
}
