//! Pipeline orchestrator: sequences ingestion, analysis, exposure mapping,
//! temporal linking, and cluster synthesis, applying the shared stage
//! contract of backlog queries, bounded retries, transient-error halts, and
//! append-only run records.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis;
use crate::config::Config;
use crate::error::AppResult;
use crate::exposure;
use crate::ingest::{self, AdapterRegistry, IngestStatus};
use crate::linking::{self, LinkingSummary};
use crate::llm::LlmClient;
use crate::notify::Notifier;
use crate::storage::{PipelineRun, RunStatus, SqliteStorage};
use crate::synthesis::{self, SynthesisSummary};

/// Shared handles every stage needs.
#[derive(Clone)]
pub struct PipelineCtx {
    pub config: Config,
    pub storage: SqliteStorage,
    pub llm: LlmClient,
    pub notifier: Notifier,
}

/// Aggregate counts for one ingestion run.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct IngestionSummary {
    pub sources: usize,
    pub sources_skipped: usize,
    pub sources_failed: usize,
    pub items_fetched: usize,
    pub items_new: usize,
    pub items_duplicate: usize,
    pub items_invalid: usize,
}

/// Aggregate counts for one enrichment stage run (analysis or exposure).
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct StageSummary {
    pub found: usize,
    pub succeeded: usize,
    pub errored: usize,
    /// Set when a transient service error halted the remaining batch.
    pub halted: bool,
}

/// Write the stage's run record. Failure to write the audit row is logged
/// and swallowed; it must never mask the stage outcome.
async fn record_run(
    storage: &SqliteStorage,
    run_type: &str,
    started_at: DateTime<Utc>,
    status: RunStatus,
    result: serde_json::Value,
    error_message: Option<String>,
) {
    let run = PipelineRun {
        id: Uuid::new_v4().to_string(),
        run_type: run_type.to_string(),
        started_at,
        finished_at: Utc::now(),
        status,
        result,
        error: error_message,
    };
    if let Err(e) = storage.insert_pipeline_run(&run).await {
        error!(run_type, error = %e, "Failed to write pipeline run record");
    }
}

/// Ingestion stage: fetch from every configured source, normalize and
/// deduplicate, track per-adapter failures through the circuit breaker.
pub async fn run_ingestion(ctx: &PipelineCtx, registry: &AdapterRegistry) -> IngestionSummary {
    let started_at = Utc::now();

    match ingest_all_sources(ctx, registry).await {
        Ok(summary) => {
            record_run(
                &ctx.storage,
                "ingestion",
                started_at,
                RunStatus::Success,
                serde_json::to_value(&summary).unwrap_or_default(),
                None,
            )
            .await;
            info!(
                items_new = summary.items_new,
                items_duplicate = summary.items_duplicate,
                sources_failed = summary.sources_failed,
                "Ingestion run finished"
            );
            check_ingestion_stall(ctx).await;
            summary
        }
        Err(e) => {
            error!(error = %e, "Ingestion run failed");
            record_run(
                &ctx.storage,
                "ingestion",
                started_at,
                RunStatus::Error,
                json!({}),
                Some(e.to_string()),
            )
            .await;
            ctx.notifier
                .alert(&format!("Ingestion run failed: {}", e))
                .await;
            IngestionSummary::default()
        }
    }
}

async fn ingest_all_sources(
    ctx: &PipelineCtx,
    registry: &AdapterRegistry,
) -> AppResult<IngestionSummary> {
    let mut sources = ingest::load_sources(&ctx.config.ingest.sources_path)?;
    sources.retain(|s| s.enabled);
    let mut summary = IngestionSummary {
        sources: sources.len(),
        ..Default::default()
    };

    for source in &sources {
        let mut adapter = match registry.build(
            source,
            ctx.storage.clone(),
            ctx.config.ingest.max_items_per_source,
        ) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(adapter_type = %source.adapter_type, error = %e, "Skipping misconfigured source");
                summary.sources_skipped += 1;
                continue;
            }
        };

        let adapter_name = adapter.name().to_string();
        match adapter.fetch().await {
            Ok(raw_items) => {
                ctx.storage.record_source_success(&adapter_name).await?;
                summary.items_fetched += raw_items.len();
                for raw in &raw_items {
                    match ingest::ingest_item(&ctx.storage, raw, &ctx.config.ingest).await {
                        Ok(outcome) => match outcome.status {
                            IngestStatus::New => summary.items_new += 1,
                            IngestStatus::Duplicate => summary.items_duplicate += 1,
                        },
                        Err(crate::error::IngestError::Validation { reasons }) => {
                            warn!(
                                source = %raw.source_name,
                                reasons = %reasons.join("; "),
                                "Dropping invalid raw item"
                            );
                            summary.items_invalid += 1;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            Err(e) => {
                // Adapter failures are isolated: other sources still run.
                summary.sources_failed += 1;
                let failures = ctx
                    .storage
                    .record_source_failure(&adapter_name, &e.to_string())
                    .await?;
                warn!(
                    adapter = %adapter_name,
                    consecutive_failures = failures,
                    error = %e,
                    "Source fetch failed"
                );
                // Alert only on the threshold crossing, not on every failure
                // past it. A later success resets the counter.
                if failures == ctx.config.pipeline.source_failure_alert_threshold {
                    ctx.notifier
                        .alert(&format!(
                            "Source '{}' has failed {} consecutive fetches. Last error: {}",
                            adapter_name, failures, e
                        ))
                        .await;
                }
            }
        }
    }

    Ok(summary)
}

/// Advisory stall check over the trailing window of ingestion runs. Requires
/// a minimum run history before evaluating so a fresh system never alarms.
pub async fn check_ingestion_stall(ctx: &PipelineCtx) {
    let pipeline = &ctx.config.pipeline;
    let cutoff = Utc::now() - Duration::hours(pipeline.stall_window_hours);

    let runs = match ctx.storage.ingestion_runs_since(cutoff).await {
        Ok(runs) => runs,
        Err(e) => {
            error!(error = %e, "Stall check failed to read run history");
            return;
        }
    };

    if runs.len() < pipeline.stall_min_runs {
        return;
    }

    let total_new: i64 = runs
        .iter()
        .map(|r| r.result["items_new"].as_i64().unwrap_or(0))
        .sum();

    if total_new < pipeline.stall_min_items {
        warn!(
            runs = runs.len(),
            total_new, "Ingestion appears stalled"
        );
        ctx.notifier
            .alert(&format!(
                "Ingestion may be stalled: {} new items across {} runs in the last {}h",
                total_new,
                runs.len(),
                pipeline.stall_window_hours
            ))
            .await;
    }
}

/// Analysis stage: classify every backlogged item.
pub async fn run_analysis(ctx: &PipelineCtx) -> StageSummary {
    let started_at = Utc::now();
    let mut summary = StageSummary::default();

    let items = match ctx
        .storage
        .unanalyzed_items(ctx.config.pipeline.max_stage_attempts)
        .await
    {
        Ok(items) => items,
        Err(e) => {
            error!(error = %e, "Analysis backlog query failed");
            record_run(
                &ctx.storage,
                "analysis",
                started_at,
                RunStatus::Error,
                json!({}),
                Some(e.to_string()),
            )
            .await;
            ctx.notifier
                .alert(&format!("Analysis run failed: {}", e))
                .await;
            return summary;
        }
    };
    summary.found = items.len();

    for item in &items {
        match analysis::classify_item(&ctx.llm, item, &ctx.config.pipeline.analysis_version).await
        {
            Ok(result) => match ctx.storage.insert_analysis(&result).await {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    error!(item_id = %item.id, error = %e, "Failed to persist analysis");
                    summary.errored += 1;
                }
            },
            Err(e) if e.is_transient() => {
                // The service itself is down; every remaining item would fail
                // identically. Halt without consuming anyone's retry budget.
                warn!(item_id = %item.id, error = %e, "Transient service error, halting analysis run");
                summary.halted = true;
                ctx.notifier
                    .alert(&format!("Analysis halted on transient error: {}", e))
                    .await;
                break;
            }
            Err(e) => {
                warn!(item_id = %item.id, error = %e, "Classification failed");
                if let Err(se) = ctx.storage.record_analysis_error(&item.id, &e.to_string()).await
                {
                    error!(item_id = %item.id, error = %se, "Failed to record analysis error");
                }
                summary.errored += 1;
            }
        }
    }

    record_run(
        &ctx.storage,
        "analysis",
        started_at,
        RunStatus::Success,
        serde_json::to_value(&summary).unwrap_or_default(),
        None,
    )
    .await;
    info!(
        found = summary.found,
        succeeded = summary.succeeded,
        errored = summary.errored,
        halted = summary.halted,
        "Analysis run finished"
    );
    summary
}

/// Exposure mapping stage: map every backlogged analysis, capped per run.
pub async fn run_exposure_mapping(ctx: &PipelineCtx) -> StageSummary {
    let started_at = Utc::now();
    let mut summary = StageSummary::default();

    let analyses = match ctx
        .storage
        .mappable_analyses(
            ctx.config.pipeline.max_stage_attempts,
            ctx.config.pipeline.exposure_max_per_run,
        )
        .await
    {
        Ok(analyses) => analyses,
        Err(e) => {
            error!(error = %e, "Exposure backlog query failed");
            record_run(
                &ctx.storage,
                "exposure_mapping",
                started_at,
                RunStatus::Error,
                json!({}),
                Some(e.to_string()),
            )
            .await;
            ctx.notifier
                .alert(&format!("Exposure mapping run failed: {}", e))
                .await;
            return summary;
        }
    };
    summary.found = analyses.len();

    for analysis in &analyses {
        match exposure::map_exposures(&ctx.llm, analysis, &ctx.config.pipeline.mapping_version)
            .await
        {
            Ok(record) => match ctx.storage.insert_exposure(&record).await {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    error!(analysis_id = %analysis.analysis_id, error = %e, "Failed to persist exposure");
                    summary.errored += 1;
                }
            },
            Err(e) if e.is_transient() => {
                warn!(
                    analysis_id = %analysis.analysis_id,
                    error = %e,
                    "Transient service error, halting exposure run"
                );
                summary.halted = true;
                ctx.notifier
                    .alert(&format!("Exposure mapping halted on transient error: {}", e))
                    .await;
                break;
            }
            Err(e) => {
                warn!(analysis_id = %analysis.analysis_id, error = %e, "Exposure mapping failed");
                if let Err(se) = ctx
                    .storage
                    .record_exposure_error(&analysis.analysis_id, &e.to_string())
                    .await
                {
                    error!(analysis_id = %analysis.analysis_id, error = %se, "Failed to record exposure error");
                }
                summary.errored += 1;
            }
        }
    }

    record_run(
        &ctx.storage,
        "exposure_mapping",
        started_at,
        RunStatus::Success,
        serde_json::to_value(&summary).unwrap_or_default(),
        None,
    )
    .await;
    info!(
        found = summary.found,
        succeeded = summary.succeeded,
        errored = summary.errored,
        halted = summary.halted,
        "Exposure mapping run finished"
    );
    summary
}

/// Temporal linking stage.
pub async fn run_temporal_linking(ctx: &PipelineCtx) -> LinkingSummary {
    let started_at = Utc::now();
    match linking::build_temporal_links(&ctx.storage, &ctx.llm, &ctx.config.pipeline).await {
        Ok(summary) => {
            record_run(
                &ctx.storage,
                "temporal_linking",
                started_at,
                RunStatus::Success,
                serde_json::to_value(&summary).unwrap_or_default(),
                None,
            )
            .await;
            info!(
                links_created = summary.links_created,
                links_existing = summary.links_existing,
                "Temporal linking run finished"
            );
            summary
        }
        Err(e) => {
            error!(error = %e, "Temporal linking run failed");
            record_run(
                &ctx.storage,
                "temporal_linking",
                started_at,
                RunStatus::Error,
                json!({}),
                Some(e.to_string()),
            )
            .await;
            ctx.notifier
                .alert(&format!("Temporal linking run failed: {}", e))
                .await;
            LinkingSummary::default()
        }
    }
}

/// Cluster synthesis stage.
pub async fn run_cluster_synthesis(ctx: &PipelineCtx) -> SynthesisSummary {
    let started_at = Utc::now();
    match synthesis::run_cluster_synthesis(&ctx.storage, &ctx.llm, &ctx.config.pipeline).await {
        Ok(summary) => {
            if summary.halted {
                ctx.notifier
                    .alert("Cluster synthesis halted on transient service error")
                    .await;
            }
            record_run(
                &ctx.storage,
                "cluster_synthesis",
                started_at,
                RunStatus::Success,
                serde_json::to_value(&summary).unwrap_or_default(),
                None,
            )
            .await;
            info!(
                synthesized = summary.synthesized,
                skipped_unchanged = summary.skipped_unchanged,
                "Cluster synthesis run finished"
            );
            summary
        }
        Err(e) => {
            error!(error = %e, "Cluster synthesis run failed");
            record_run(
                &ctx.storage,
                "cluster_synthesis",
                started_at,
                RunStatus::Error,
                json!({}),
                Some(e.to_string()),
            )
            .await;
            ctx.notifier
                .alert(&format!("Cluster synthesis run failed: {}", e))
                .await;
            SynthesisSummary::default()
        }
    }
}

/// Database backup: snapshot into the backup directory and prune old files.
pub async fn run_backup(ctx: &PipelineCtx) {
    let started_at = Utc::now();
    match backup_inner(ctx).await {
        Ok(path) => {
            record_run(
                &ctx.storage,
                "backup",
                started_at,
                RunStatus::Success,
                json!({ "path": path }),
                None,
            )
            .await;
            info!(path, "Backup finished");
        }
        Err(e) => {
            error!(error = %e, "Backup failed");
            record_run(
                &ctx.storage,
                "backup",
                started_at,
                RunStatus::Error,
                json!({}),
                Some(e.to_string()),
            )
            .await;
            ctx.notifier.alert(&format!("Backup failed: {}", e)).await;
        }
    }
}

async fn backup_inner(ctx: &PipelineCtx) -> AppResult<String> {
    let backup = &ctx.config.backup;
    std::fs::create_dir_all(&backup.dir).map_err(|e| crate::error::AppError::Internal {
        message: format!("Failed to create backup directory: {}", e),
    })?;

    let filename = format!("worldlines-{}.db", Utc::now().format("%Y%m%d-%H%M%S"));
    let path = backup.dir.join(filename);
    ctx.storage.backup_to(&path).await.map_err(crate::error::AppError::Storage)?;

    prune_backups(ctx);
    Ok(path.display().to_string())
}

/// Remove backup files older than the retention window. Best-effort.
fn prune_backups(ctx: &PipelineCtx) {
    let backup = &ctx.config.backup;
    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs(backup.retention_days as u64 * 86_400);

    let Ok(entries) = std::fs::read_dir(&backup.dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_backup = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("worldlines-") && n.ends_with(".db"));
        if !is_backup {
            continue;
        }
        let too_old = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|t| t < cutoff)
            .unwrap_or(false);
        if too_old {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to prune backup");
            }
        }
    }
}

/// One full pipeline cycle in the fixed stage order. Each stage consumes only
/// persisted output of the previous one, so an earlier stage's failure never
/// blocks the later stages from draining their own backlogs.
pub async fn run_cycle(ctx: &PipelineCtx, registry: &AdapterRegistry) {
    info!("Starting pipeline cycle");
    run_ingestion(ctx, registry).await;
    run_analysis(ctx).await;
    run_exposure_mapping(ctx).await;
    run_temporal_linking(ctx).await;
    run_cluster_synthesis(ctx).await;
    info!("Pipeline cycle finished");
}
