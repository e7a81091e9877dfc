//! Storage layer for the pipeline's persisted state.
//!
//! SQLite-backed: items, analyses, exposures, dedup records, adapter state,
//! pipeline runs, per-stage error records, source error counters, temporal
//! links, and cluster syntheses. All timestamps are stored as RFC 3339 UTC
//! strings; JSON-shaped columns are opaque payloads owned by their writer.

mod sqlite;

pub use sqlite::{InsertOutcome, SqliteStorage};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed set of source types an adapter may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    News,
    Filing,
    Transcript,
    Report,
    Research,
    Government,
    Policy,
    Industry,
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::News => "news",
            SourceType::Filing => "filing",
            SourceType::Transcript => "transcript",
            SourceType::Report => "report",
            SourceType::Research => "research",
            SourceType::Government => "government",
            SourceType::Policy => "policy",
            SourceType::Industry => "industry",
            SourceType::Other => "other",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "news" => Ok(SourceType::News),
            "filing" => Ok(SourceType::Filing),
            "transcript" => Ok(SourceType::Transcript),
            "report" => Ok(SourceType::Report),
            "research" => Ok(SourceType::Research),
            "government" => Ok(SourceType::Government),
            "policy" => Ok(SourceType::Policy),
            "industry" => Ok(SourceType::Industry),
            "other" => Ok(SourceType::Other),
            _ => Err(format!("Unknown source type: {}", s)),
        }
    }
}

/// Classification outcome class for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Reinforcing,
    Friction,
    EarlySignal,
    Neutral,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Reinforcing => "reinforcing",
            ChangeType::Friction => "friction",
            ChangeType::EarlySignal => "early_signal",
            ChangeType::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reinforcing" => Ok(ChangeType::Reinforcing),
            "friction" => Ok(ChangeType::Friction),
            "early_signal" => Ok(ChangeType::EarlySignal),
            "neutral" => Ok(ChangeType::Neutral),
            _ => Err(format!("Unknown change type: {}", s)),
        }
    }
}

/// Type of a directed temporal link between two items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Reinforces,
    Contradicts,
    Extends,
    Supersedes,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Reinforces => "reinforces",
            LinkType::Contradicts => "contradicts",
            LinkType::Extends => "extends",
            LinkType::Supersedes => "supersedes",
        }
    }
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reinforces" => Ok(LinkType::Reinforces),
            "contradicts" => Ok(LinkType::Contradicts),
            "extends" => Ok(LinkType::Extends),
            "supersedes" => Ok(LinkType::Supersedes),
            _ => Err(format!("Unknown link type: {}", s)),
        }
    }
}

/// How a duplicate was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMethod {
    HashExact,
    ContentSimilarity,
}

impl DedupMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupMethod::HashExact => "hash_exact",
            DedupMethod::ContentSimilarity => "content_similarity",
        }
    }
}

impl std::fmt::Display for DedupMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DedupMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hash_exact" => Ok(DedupMethod::HashExact),
            "content_similarity" => Ok(DedupMethod::ContentSimilarity),
            _ => Err(format!("Unknown dedup method: {}", s)),
        }
    }
}

/// Overall status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "error" => Ok(RunStatus::Error),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Canonical internal representation of an ingested item. Immutable once
/// created; `dedup_hash` is unique across the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub id: String,
    pub title: String,
    pub source_name: String,
    pub source_type: SourceType,
    /// published_at when the adapter supplied one, else ingestion time.
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub canonical_link: Option<String>,
    pub ingested_at: DateTime<Utc>,
    pub dedup_hash: String,
}

/// Classification output for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: String,
    pub item_id: String,
    /// JSON array of {dimension, relevance}.
    pub dimensions: serde_json::Value,
    pub change_type: ChangeType,
    pub time_horizon: String,
    pub summary: String,
    pub importance: String,
    /// JSON array of entity strings.
    pub key_entities: serde_json::Value,
    pub analyzed_at: DateTime<Utc>,
    pub analysis_version: String,
}

/// Exposure mapping output for one analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureRecord {
    pub id: String,
    pub analysis_id: String,
    /// JSON array of exposure objects; schema owned by the exposure stage.
    pub exposures: serde_json::Value,
    pub skipped_reason: Option<String>,
    pub mapped_at: DateTime<Utc>,
    pub mapping_version: String,
}

/// One row per stage invocation (append-only audit log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub run_type: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub result: serde_json::Value,
    pub error: Option<String>,
}

/// Directed edge between two items; source is temporally newer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalLink {
    pub id: String,
    pub source_item_id: String,
    pub target_item_id: String,
    pub link_type: LinkType,
    pub created_at: DateTime<Utc>,
    pub rationale: String,
}

/// Stored synthesis for one ticker cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSynthesis {
    pub ticker: String,
    /// Sorted member item ids.
    pub member_item_ids: Vec<String>,
    pub item_count: i64,
    pub synthesis: String,
    pub version: String,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one detected duplicate event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupRecord {
    pub canonical_item_id: String,
    pub duplicate_item_ids: Vec<String>,
    pub deduped_at: DateTime<Utc>,
    pub method: DedupMethod,
}

/// Per-adapter consecutive-failure counter read by the circuit breaker.
#[derive(Debug, Clone)]
pub struct SourceErrorRecord {
    pub adapter_name: String,
    pub consecutive_failures: i64,
    pub last_error: Option<String>,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub last_succeeded_at: Option<DateTime<Utc>>,
}

/// Retry-bounding record for one subject in one stage.
#[derive(Debug, Clone)]
pub struct StageErrorRecord {
    pub subject_id: String,
    pub attempt_count: i64,
    pub last_error: String,
    pub last_attempted_at: DateTime<Utc>,
}

/// An analysis joined with its item, as needed by the exposure prompt.
#[derive(Debug, Clone)]
pub struct MappableAnalysis {
    pub analysis_id: String,
    pub summary: String,
    pub dimensions: String,
    pub change_type: ChangeType,
    pub time_horizon: String,
    pub importance: String,
    pub key_entities: String,
    pub title: String,
    pub source_name: String,
    pub source_type: SourceType,
}

/// An item with its classification and exposure tickers, as consumed by the
/// temporal graph builder.
#[derive(Debug, Clone)]
pub struct EnrichedItem {
    pub item_id: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub dimensions: String,
    pub change_type: ChangeType,
    pub tickers: Vec<String>,
}
