use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::{
    Analysis, ChangeType, ClusterSynthesis, DedupMethod, DedupRecord, EnrichedItem, ExposureRecord,
    LinkType, MappableAnalysis, NormalizedItem, PipelineRun, RunStatus, SourceErrorRecord,
    SourceType, StageErrorRecord, TemporalLink,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Outcome of attempting to persist a new item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The item was inserted.
    Inserted,
    /// Another item already holds this dedup_hash (lost race or duplicate).
    DuplicateHash { existing_id: String },
}

/// SQLite-backed storage.
///
/// WAL journal mode keeps the read-only query path from blocking behind
/// writes; connections are acquired per logical operation and never held
/// across an external-service round-trip.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if missing) and migrate the database.
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- Items ---

    /// Insert a NormalizedItem, treating a dedup_hash uniqueness violation as
    /// a duplicate detection rather than an error. This is the atomicity
    /// backstop: a lost race between two concurrent ingests resolves to
    /// `DuplicateHash` for the loser.
    pub async fn insert_item(&self, item: &NormalizedItem) -> StorageResult<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO items
                (id, title, source_name, source_type, timestamp, content,
                 canonical_link, ingested_at, dedup_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.source_name)
        .bind(item.source_type.as_str())
        .bind(item.timestamp.to_rfc3339())
        .bind(&item.content)
        .bind(&item.canonical_link)
        .bind(item.ingested_at.to_rfc3339())
        .bind(&item.dedup_hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let existing_id = self
                    .find_item_id_by_hash(&item.dedup_hash)
                    .await?
                    .ok_or_else(|| StorageError::ItemNotFound {
                        item_id: item.dedup_hash.clone(),
                    })?;
                Ok(InsertOutcome::DuplicateHash { existing_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up the id of the item holding a given dedup hash.
    pub async fn find_item_id_by_hash(&self, dedup_hash: &str) -> StorageResult<Option<String>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM items WHERE dedup_hash = ?")
                .bind(dedup_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    /// Fetch one item by id.
    pub async fn get_item(&self, id: &str) -> StorageResult<Option<NormalizedItem>> {
        let row: Option<ItemRow> = sqlx::query_as(
            r#"
            SELECT id, title, source_name, source_type, timestamp, content,
                   canonical_link, ingested_at, dedup_hash
            FROM items WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.into()))
    }

    /// Total number of items in the store.
    pub async fn count_items(&self) -> StorageResult<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Titles of items ingested at or after `cutoff`, most recent first,
    /// bounded by `limit`. Backs the similarity dedup pass.
    pub async fn recent_item_titles(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> StorageResult<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT id, title FROM items
            WHERE ingested_at >= ?
            ORDER BY ingested_at DESC
            LIMIT ?
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // --- Deduplication records ---

    /// Append one duplicate-detection event.
    pub async fn insert_dedup_record(
        &self,
        canonical_item_id: &str,
        duplicate_item_ids: &[String],
        method: DedupMethod,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deduplication_records
                (canonical_item_id, duplicate_item_ids, deduped_at, method)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(canonical_item_id)
        .bind(serde_json::to_string(duplicate_item_ids).unwrap_or_default())
        .bind(Utc::now().to_rfc3339())
        .bind(method.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All dedup records pointing at a canonical item.
    pub async fn dedup_records_for(
        &self,
        canonical_item_id: &str,
    ) -> StorageResult<Vec<DedupRecord>> {
        let rows: Vec<DedupRecordRow> = sqlx::query_as(
            r#"
            SELECT canonical_item_id, duplicate_item_ids, deduped_at, method
            FROM deduplication_records
            WHERE canonical_item_id = ?
            ORDER BY deduped_at ASC
            "#,
        )
        .bind(canonical_item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    // --- Adapter state ---

    /// Load an adapter's opaque state payload for one feed key.
    pub async fn load_adapter_state(
        &self,
        adapter_name: &str,
        feed_key: &str,
    ) -> StorageResult<Option<serde_json::Value>> {
        let data: Option<String> = sqlx::query_scalar(
            "SELECT state_data FROM adapter_state WHERE adapter_name = ? AND feed_key = ?",
        )
        .bind(adapter_name)
        .bind(feed_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(data.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Upsert an adapter's opaque state payload for one feed key.
    pub async fn save_adapter_state(
        &self,
        adapter_name: &str,
        feed_key: &str,
        state: &serde_json::Value,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO adapter_state (adapter_name, feed_key, state_data, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(adapter_name, feed_key) DO UPDATE SET
                state_data = excluded.state_data, updated_at = excluded.updated_at
            "#,
        )
        .bind(adapter_name)
        .bind(feed_key)
        .bind(state.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Analyses ---

    /// Items with no analysis and fewer than `max_attempts` failed attempts,
    /// oldest first. This is the classification stage's backlog query.
    pub async fn unanalyzed_items(&self, max_attempts: i64) -> StorageResult<Vec<NormalizedItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(
            r#"
            SELECT i.id, i.title, i.source_name, i.source_type, i.timestamp,
                   i.content, i.canonical_link, i.ingested_at, i.dedup_hash
            FROM items i
            LEFT JOIN analyses a ON i.id = a.item_id
            LEFT JOIN analysis_errors ae ON i.id = ae.item_id
            WHERE a.id IS NULL
              AND (ae.attempt_count IS NULL OR ae.attempt_count < ?)
            ORDER BY i.ingested_at ASC
            "#,
        )
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Persist one classification output.
    pub async fn insert_analysis(&self, analysis: &Analysis) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO analyses
                (id, item_id, dimensions, change_type, time_horizon, summary,
                 importance, key_entities, analyzed_at, analysis_version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&analysis.id)
        .bind(&analysis.item_id)
        .bind(analysis.dimensions.to_string())
        .bind(analysis.change_type.as_str())
        .bind(&analysis.time_horizon)
        .bind(&analysis.summary)
        .bind(&analysis.importance)
        .bind(analysis.key_entities.to_string())
        .bind(analysis.analyzed_at.to_rfc3339())
        .bind(&analysis.analysis_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upsert the retry-bounding record for a failed classification attempt.
    /// Increments attempt_count for an existing subject.
    pub async fn record_analysis_error(&self, item_id: &str, message: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO analysis_errors (item_id, attempt_count, last_error, last_attempted_at)
            VALUES (?, 1, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                attempt_count = attempt_count + 1,
                last_error = excluded.last_error,
                last_attempted_at = excluded.last_attempted_at
            "#,
        )
        .bind(item_id)
        .bind(message)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read the classification error record for one item.
    pub async fn analysis_error(&self, item_id: &str) -> StorageResult<Option<StageErrorRecord>> {
        let row: Option<StageErrorRow> = sqlx::query_as(
            r#"
            SELECT item_id AS subject_id, attempt_count, last_error, last_attempted_at
            FROM analysis_errors WHERE item_id = ?
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.into()))
    }

    // --- Exposures ---

    /// Analyses with no exposure record and fewer than `max_attempts` failed
    /// attempts, oldest first, capped at `limit`.
    pub async fn mappable_analyses(
        &self,
        max_attempts: i64,
        limit: i64,
    ) -> StorageResult<Vec<MappableAnalysis>> {
        let rows: Vec<MappableAnalysisRow> = sqlx::query_as(
            r#"
            SELECT a.id AS analysis_id, a.summary, a.dimensions, a.change_type,
                   a.time_horizon, a.importance, a.key_entities,
                   i.title, i.source_name, i.source_type
            FROM analyses a
            JOIN items i ON a.item_id = i.id
            LEFT JOIN exposures e ON a.id = e.analysis_id
            LEFT JOIN exposure_errors ee ON a.id = ee.analysis_id
            WHERE e.id IS NULL
              AND (ee.attempt_count IS NULL OR ee.attempt_count < ?)
            ORDER BY a.analyzed_at ASC
            LIMIT ?
            "#,
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Persist one exposure mapping output.
    pub async fn insert_exposure(&self, record: &ExposureRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO exposures
                (id, analysis_id, exposures, skipped_reason, mapped_at, mapping_version)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.analysis_id)
        .bind(record.exposures.to_string())
        .bind(&record.skipped_reason)
        .bind(record.mapped_at.to_rfc3339())
        .bind(&record.mapping_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upsert the retry-bounding record for a failed mapping attempt.
    pub async fn record_exposure_error(
        &self,
        analysis_id: &str,
        message: &str,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO exposure_errors (analysis_id, attempt_count, last_error, last_attempted_at)
            VALUES (?, 1, ?, ?)
            ON CONFLICT(analysis_id) DO UPDATE SET
                attempt_count = attempt_count + 1,
                last_error = excluded.last_error,
                last_attempted_at = excluded.last_attempted_at
            "#,
        )
        .bind(analysis_id)
        .bind(message)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read the exposure error record for one analysis.
    pub async fn exposure_error(
        &self,
        analysis_id: &str,
    ) -> StorageResult<Option<StageErrorRecord>> {
        let row: Option<StageErrorRow> = sqlx::query_as(
            r#"
            SELECT analysis_id AS subject_id, attempt_count, last_error, last_attempted_at
            FROM exposure_errors WHERE analysis_id = ?
            "#,
        )
        .bind(analysis_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.into()))
    }

    // --- Source error counters (circuit breaker) ---

    /// Increment an adapter's consecutive-failure counter, returning the
    /// post-increment value. The caller alerts only when the returned value
    /// equals the threshold - the crossing event, not every failure past it.
    pub async fn record_source_failure(
        &self,
        adapter_name: &str,
        message: &str,
    ) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        let count: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO source_errors
                (adapter_name, consecutive_failures, last_error, last_failed_at)
            VALUES (?, 1, ?, ?)
            ON CONFLICT(adapter_name) DO UPDATE SET
                consecutive_failures = consecutive_failures + 1,
                last_error = excluded.last_error,
                last_failed_at = excluded.last_failed_at
            RETURNING consecutive_failures
            "#,
        )
        .bind(adapter_name)
        .bind(message)
        .bind(&now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Reset an adapter's consecutive-failure counter after a clean fetch.
    pub async fn record_source_success(&self, adapter_name: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO source_errors
                (adapter_name, consecutive_failures, last_succeeded_at)
            VALUES (?, 0, ?)
            ON CONFLICT(adapter_name) DO UPDATE SET
                consecutive_failures = 0,
                last_succeeded_at = excluded.last_succeeded_at
            "#,
        )
        .bind(adapter_name)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read one adapter's failure counter.
    pub async fn source_error(
        &self,
        adapter_name: &str,
    ) -> StorageResult<Option<SourceErrorRecord>> {
        let row: Option<SourceErrorRow> = sqlx::query_as(
            r#"
            SELECT adapter_name, consecutive_failures, last_error,
                   last_failed_at, last_succeeded_at
            FROM source_errors WHERE adapter_name = ?
            "#,
        )
        .bind(adapter_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.into()))
    }

    // --- Pipeline runs ---

    /// Append one run record.
    pub async fn insert_pipeline_run(&self, run: &PipelineRun) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs
                (id, run_type, started_at, finished_at, status, result, error)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.run_type)
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.to_rfc3339())
        .bind(run.status.as_str())
        .bind(run.result.to_string())
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All runs of one type, most recent first.
    pub async fn pipeline_runs(&self, run_type: &str) -> StorageResult<Vec<PipelineRun>> {
        let rows: Vec<PipelineRunRow> = sqlx::query_as(
            r#"
            SELECT id, run_type, started_at, finished_at, status, result, error
            FROM pipeline_runs
            WHERE run_type = ?
            ORDER BY started_at DESC
            "#,
        )
        .bind(run_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Ingestion runs started at or after `cutoff`, most recent first.
    /// Backs stall detection.
    pub async fn ingestion_runs_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<PipelineRun>> {
        let rows: Vec<PipelineRunRow> = sqlx::query_as(
            r#"
            SELECT id, run_type, started_at, finished_at, status, result, error
            FROM pipeline_runs
            WHERE run_type = 'ingestion' AND started_at >= ?
            ORDER BY started_at DESC
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    // --- Temporal links ---

    /// Items with a classification and a non-skipped exposure record, at or
    /// after `cutoff`, oldest first. Tickers are extracted from the exposure
    /// payload.
    pub async fn enriched_items_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StorageResult<Vec<EnrichedItem>> {
        let rows: Vec<EnrichedItemRow> = sqlx::query_as(
            r#"
            SELECT i.id AS item_id, i.title, i.timestamp, a.summary,
                   a.dimensions, a.change_type, e.exposures
            FROM items i
            JOIN analyses a ON a.item_id = i.id
            JOIN exposures e ON e.analysis_id = a.id
            WHERE i.timestamp >= ? AND e.skipped_reason IS NULL
            ORDER BY i.timestamp ASC
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// True if a directed edge already exists for the ordered pair.
    pub async fn temporal_link_exists(
        &self,
        source_item_id: &str,
        target_item_id: &str,
    ) -> StorageResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM temporal_links WHERE source_item_id = ? AND target_item_id = ?",
        )
        .bind(source_item_id)
        .bind(target_item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Insert an edge. A duplicate ordered pair is a no-op, returning false,
    /// so re-running the builder after partial completion is safe.
    pub async fn insert_temporal_link(&self, link: &TemporalLink) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO temporal_links
                (id, source_item_id, target_item_id, link_type, created_at, rationale)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_item_id, target_item_id) DO NOTHING
            "#,
        )
        .bind(&link.id)
        .bind(&link.source_item_id)
        .bind(&link.target_item_id)
        .bind(link.link_type.as_str())
        .bind(link.created_at.to_rfc3339())
        .bind(&link.rationale)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All stored temporal links.
    pub async fn temporal_links(&self) -> StorageResult<Vec<TemporalLink>> {
        let rows: Vec<TemporalLinkRow> = sqlx::query_as(
            r#"
            SELECT id, source_item_id, target_item_id, link_type, created_at, rationale
            FROM temporal_links
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    // --- Cluster syntheses ---

    /// Read the stored synthesis for one ticker.
    pub async fn cluster_synthesis(&self, ticker: &str) -> StorageResult<Option<ClusterSynthesis>> {
        let row: Option<ClusterSynthesisRow> = sqlx::query_as(
            r#"
            SELECT ticker, member_item_ids, item_count, synthesis, version, updated_at
            FROM cluster_syntheses WHERE ticker = ?
            "#,
        )
        .bind(ticker)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.into()))
    }

    /// Upsert the synthesis for one ticker.
    pub async fn upsert_cluster_synthesis(&self, row: &ClusterSynthesis) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cluster_syntheses
                (ticker, member_item_ids, item_count, synthesis, version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(ticker) DO UPDATE SET
                member_item_ids = excluded.member_item_ids,
                item_count = excluded.item_count,
                synthesis = excluded.synthesis,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.ticker)
        .bind(serde_json::to_string(&row.member_item_ids).unwrap_or_default())
        .bind(row.item_count)
        .bind(&row.synthesis)
        .bind(&row.version)
        .bind(row.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Backup ---

    /// Write a consistent snapshot of the database to `path`.
    pub async fn backup_to(&self, path: &Path) -> StorageResult<()> {
        sqlx::query("VACUUM INTO ?")
            .bind(path.to_string_lossy().to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_ts_opt(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

// Internal row types for SQLx mapping

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: String,
    title: String,
    source_name: String,
    source_type: String,
    timestamp: String,
    content: String,
    canonical_link: Option<String>,
    ingested_at: String,
    dedup_hash: String,
}

impl From<ItemRow> for NormalizedItem {
    fn from(row: ItemRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            source_name: row.source_name,
            source_type: SourceType::from_str(&row.source_type).unwrap_or(SourceType::Other),
            timestamp: parse_ts(&row.timestamp),
            content: row.content,
            canonical_link: row.canonical_link,
            ingested_at: parse_ts(&row.ingested_at),
            dedup_hash: row.dedup_hash,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DedupRecordRow {
    canonical_item_id: String,
    duplicate_item_ids: String,
    deduped_at: String,
    method: String,
}

impl From<DedupRecordRow> for DedupRecord {
    fn from(row: DedupRecordRow) -> Self {
        Self {
            canonical_item_id: row.canonical_item_id,
            duplicate_item_ids: serde_json::from_str(&row.duplicate_item_ids)
                .unwrap_or_default(),
            deduped_at: parse_ts(&row.deduped_at),
            method: DedupMethod::from_str(&row.method).unwrap_or(DedupMethod::HashExact),
        }
    }
}

#[derive(sqlx::FromRow)]
struct StageErrorRow {
    subject_id: String,
    attempt_count: i64,
    last_error: String,
    last_attempted_at: String,
}

impl From<StageErrorRow> for StageErrorRecord {
    fn from(row: StageErrorRow) -> Self {
        Self {
            subject_id: row.subject_id,
            attempt_count: row.attempt_count,
            last_error: row.last_error,
            last_attempted_at: parse_ts(&row.last_attempted_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SourceErrorRow {
    adapter_name: String,
    consecutive_failures: i64,
    last_error: Option<String>,
    last_failed_at: Option<String>,
    last_succeeded_at: Option<String>,
}

impl From<SourceErrorRow> for SourceErrorRecord {
    fn from(row: SourceErrorRow) -> Self {
        Self {
            adapter_name: row.adapter_name,
            consecutive_failures: row.consecutive_failures,
            last_error: row.last_error,
            last_failed_at: parse_ts_opt(row.last_failed_at.as_deref()),
            last_succeeded_at: parse_ts_opt(row.last_succeeded_at.as_deref()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct MappableAnalysisRow {
    analysis_id: String,
    summary: String,
    dimensions: String,
    change_type: String,
    time_horizon: String,
    importance: String,
    key_entities: String,
    title: String,
    source_name: String,
    source_type: String,
}

impl From<MappableAnalysisRow> for MappableAnalysis {
    fn from(row: MappableAnalysisRow) -> Self {
        Self {
            analysis_id: row.analysis_id,
            summary: row.summary,
            dimensions: row.dimensions,
            change_type: ChangeType::from_str(&row.change_type).unwrap_or(ChangeType::Neutral),
            time_horizon: row.time_horizon,
            importance: row.importance,
            key_entities: row.key_entities,
            title: row.title,
            source_name: row.source_name,
            source_type: SourceType::from_str(&row.source_type).unwrap_or(SourceType::Other),
        }
    }
}

#[derive(sqlx::FromRow)]
struct PipelineRunRow {
    id: String,
    run_type: String,
    started_at: String,
    finished_at: String,
    status: String,
    result: String,
    error: Option<String>,
}

impl From<PipelineRunRow> for PipelineRun {
    fn from(row: PipelineRunRow) -> Self {
        Self {
            id: row.id,
            run_type: row.run_type,
            started_at: parse_ts(&row.started_at),
            finished_at: parse_ts(&row.finished_at),
            status: RunStatus::from_str(&row.status).unwrap_or(RunStatus::Error),
            result: serde_json::from_str(&row.result).unwrap_or(serde_json::Value::Null),
            error: row.error,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EnrichedItemRow {
    item_id: String,
    title: String,
    timestamp: String,
    summary: String,
    dimensions: String,
    change_type: String,
    exposures: String,
}

impl From<EnrichedItemRow> for EnrichedItem {
    fn from(row: EnrichedItemRow) -> Self {
        let mut tickers = serde_json::from_str::<serde_json::Value>(&row.exposures)
            .ok()
            .and_then(|v| {
                v.as_array().map(|arr| {
                    arr.iter()
                        .filter_map(|e| e["ticker"].as_str().map(|t| t.to_string()))
                        .collect::<Vec<_>>()
                })
            })
            .unwrap_or_default();
        // A malformed payload repeating a ticker must not pair an item with
        // itself in the graph builder.
        tickers.sort();
        tickers.dedup();

        Self {
            item_id: row.item_id,
            title: row.title,
            timestamp: parse_ts(&row.timestamp),
            summary: row.summary,
            dimensions: row.dimensions,
            change_type: ChangeType::from_str(&row.change_type).unwrap_or(ChangeType::Neutral),
            tickers,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TemporalLinkRow {
    id: String,
    source_item_id: String,
    target_item_id: String,
    link_type: String,
    created_at: String,
    rationale: String,
}

impl From<TemporalLinkRow> for TemporalLink {
    fn from(row: TemporalLinkRow) -> Self {
        Self {
            id: row.id,
            source_item_id: row.source_item_id,
            target_item_id: row.target_item_id,
            link_type: LinkType::from_str(&row.link_type).unwrap_or(LinkType::Extends),
            created_at: parse_ts(&row.created_at),
            rationale: row.rationale,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ClusterSynthesisRow {
    ticker: String,
    member_item_ids: String,
    item_count: i64,
    synthesis: String,
    version: String,
    updated_at: String,
}

impl From<ClusterSynthesisRow> for ClusterSynthesis {
    fn from(row: ClusterSynthesisRow) -> Self {
        Self {
            ticker: row.ticker,
            member_item_ids: serde_json::from_str(&row.member_item_ids).unwrap_or_default(),
            item_count: row.item_count,
            synthesis: row.synthesis,
            version: row.version,
            updated_at: parse_ts(&row.updated_at),
        }
    }
}
