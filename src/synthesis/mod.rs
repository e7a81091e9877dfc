//! Cluster synthesis stage: one derived summary per ticker whose member set
//! changed since the last run.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::StorageResult;
use crate::llm::{parse_json_response, ErrorCode, LlmClient, ServiceError, ServiceResult};
use crate::prompts;
use crate::storage::{ClusterSynthesis, EnrichedItem, SqliteStorage};

const MAX_SYNTHESIS_CHARS: usize = 600;

/// Aggregate counts for one synthesis run.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct SynthesisSummary {
    pub clusters_considered: usize,
    pub synthesized: usize,
    pub skipped_unchanged: usize,
    pub skipped_small: usize,
    pub errored: usize,
    /// Set when a transient service error halted the remaining clusters.
    pub halted: bool,
}

/// Recompute cluster syntheses over enriched items in the trailing window.
///
/// A cluster whose sorted member-id set is unchanged since the stored
/// synthesis is skipped with no external call and no write. A transient
/// service error halts the remaining clusters in this run.
pub async fn run_cluster_synthesis(
    storage: &SqliteStorage,
    llm: &LlmClient,
    config: &PipelineConfig,
) -> StorageResult<SynthesisSummary> {
    let cutoff = Utc::now() - Duration::days(config.link_window_days);
    let items = storage.enriched_items_since(cutoff).await?;

    let mut clusters: BTreeMap<String, Vec<&EnrichedItem>> = BTreeMap::new();
    for item in &items {
        for ticker in &item.tickers {
            clusters.entry(ticker.clone()).or_default().push(item);
        }
    }

    let mut summary = SynthesisSummary::default();

    for (ticker, members) in clusters {
        summary.clusters_considered += 1;

        if members.len() < config.cluster_min_items {
            summary.skipped_small += 1;
            continue;
        }

        let mut member_ids: Vec<String> =
            members.iter().map(|m| m.item_id.clone()).collect();
        member_ids.sort();
        member_ids.dedup();

        let stored = storage.cluster_synthesis(&ticker).await?;
        if let Some(existing) = &stored {
            if existing.member_item_ids == member_ids {
                summary.skipped_unchanged += 1;
                debug!(ticker = %ticker, "Cluster membership unchanged, skipping");
                continue;
            }
        }

        match synthesize_cluster(llm, &ticker, &members).await {
            Ok(text) => {
                let row = ClusterSynthesis {
                    ticker: ticker.clone(),
                    item_count: member_ids.len() as i64,
                    member_item_ids: member_ids,
                    synthesis: text,
                    version: config.synthesis_version.clone(),
                    updated_at: Utc::now(),
                };
                storage.upsert_cluster_synthesis(&row).await?;
                summary.synthesized += 1;
                info!(ticker = %ticker, items = row.item_count, "Synthesized cluster");
            }
            Err(e) if e.is_transient() => {
                warn!(ticker = %ticker, error = %e, "Transient service error, halting synthesis run");
                summary.halted = true;
                break;
            }
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Cluster synthesis failed");
                summary.errored += 1;
            }
        }
    }

    Ok(summary)
}

/// Call the synthesis service for one ticker cluster and validate the result.
pub async fn synthesize_cluster(
    llm: &LlmClient,
    ticker: &str,
    members: &[&EnrichedItem],
) -> ServiceResult<String> {
    let observations = members
        .iter()
        .map(|m| {
            format!(
                "- [{}] {} ({}): {}",
                m.timestamp.format("%Y-%m-%d"),
                m.title,
                m.change_type,
                m.summary
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let system = prompts::SYNTHESIS_SYSTEM_PROMPT.replace("{ticker}", ticker);
    let prompt = prompts::format_synthesis_prompt(ticker, members.len(), &observations);

    let raw = llm.complete(&system, &prompt).await?;
    let parsed = parse_json_response(&raw)?;

    let text = parsed["synthesis"].as_str().unwrap_or_default().trim();
    if text.is_empty() {
        return Err(ServiceError::new(
            ErrorCode::EmptySynthesis,
            "response carried no synthesis text",
        ));
    }
    if let Some(term) = prompts::find_forbidden_term(text) {
        return Err(ServiceError::new(
            ErrorCode::ForbiddenTerm,
            format!("synthesis contains forbidden term: {}", term),
        ));
    }

    Ok(truncate_synthesis(text))
}

/// Over-length syntheses are truncated rather than rejected; an ellipsis
/// marks the cut.
fn truncate_synthesis(text: &str) -> String {
    if text.chars().count() <= MAX_SYNTHESIS_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_SYNTHESIS_CHARS - 1).collect();
    out.push('…');
    out
}
