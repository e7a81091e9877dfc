//! Temporal graph builder: derives directed links between items that share a
//! ticker within a trailing window.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::StorageResult;
use crate::llm::{parse_json_response, ErrorCode, LlmClient, ServiceError, ServiceResult};
use crate::prompts;
use crate::storage::{ChangeType, EnrichedItem, LinkType, SqliteStorage, TemporalLink};

/// Aggregate counts for one linking run.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct LinkingSummary {
    pub items_considered: usize,
    pub pairs_considered: usize,
    pub links_created: usize,
    pub links_existing: usize,
}

/// Decide the edge type from the two endpoint outcome classes. Deterministic
/// and symmetric in its inputs.
pub fn decide_link_type(a: ChangeType, b: ChangeType) -> LinkType {
    if a == b {
        return LinkType::Reinforces;
    }
    let opposing = matches!(
        (a, b),
        (ChangeType::Reinforcing, ChangeType::Friction)
            | (ChangeType::Friction, ChangeType::Reinforcing)
    );
    if opposing {
        LinkType::Contradicts
    } else {
        LinkType::Extends
    }
}

/// Build temporal links over enriched items in the trailing window.
///
/// Edge insertion is idempotent: an existing (source, target) pair is skipped
/// before any rationale call is made, so re-running the builder after partial
/// completion issues no redundant external calls.
pub async fn build_temporal_links(
    storage: &SqliteStorage,
    llm: &LlmClient,
    config: &PipelineConfig,
) -> StorageResult<LinkingSummary> {
    let cutoff = Utc::now() - Duration::days(config.link_window_days);
    let items = storage.enriched_items_since(cutoff).await?;

    let mut summary = LinkingSummary {
        items_considered: items.len(),
        ..Default::default()
    };

    // Ordered pair -> shared tickers. BTreeMap keeps runs deterministic.
    let mut pairs: BTreeMap<(usize, usize), Vec<String>> = BTreeMap::new();
    let mut by_ticker: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, item) in items.iter().enumerate() {
        for ticker in &item.tickers {
            by_ticker.entry(ticker.as_str()).or_default().push(idx);
        }
    }

    for (ticker, members) in &by_ticker {
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                let (a, b) = (members[i], members[j]);
                // Newer item is the edge source. Items arrive oldest first.
                let (target, source) = if items[a].timestamp <= items[b].timestamp {
                    (a, b)
                } else {
                    (b, a)
                };
                pairs
                    .entry((source, target))
                    .or_default()
                    .push(ticker.to_string());
            }
        }
    }

    for ((source_idx, target_idx), tickers) in pairs {
        summary.pairs_considered += 1;
        let source = &items[source_idx];
        let target = &items[target_idx];

        if storage
            .temporal_link_exists(&source.item_id, &target.item_id)
            .await?
        {
            summary.links_existing += 1;
            continue;
        }

        let link_type = decide_link_type(source.change_type, target.change_type);
        let rationale = match generate_rationale(llm, source, target, &tickers).await {
            Ok(text) => text,
            Err(e) => {
                // Rationale generation is best-effort; a mechanical fallback
                // keeps the edge itself intact.
                warn!(
                    source = %source.item_id,
                    target = %target.item_id,
                    error = %e,
                    "Rationale generation failed, using fallback"
                );
                mechanical_rationale(source, target, &tickers, link_type)
            }
        };

        let link = TemporalLink {
            id: Uuid::new_v4().to_string(),
            source_item_id: source.item_id.clone(),
            target_item_id: target.item_id.clone(),
            link_type,
            created_at: Utc::now(),
            rationale,
        };

        if storage.insert_temporal_link(&link).await? {
            summary.links_created += 1;
            debug!(
                source = %link.source_item_id,
                target = %link.target_item_id,
                link_type = %link.link_type,
                "Created temporal link"
            );
        } else {
            summary.links_existing += 1;
        }
    }

    Ok(summary)
}

async fn generate_rationale(
    llm: &LlmClient,
    source: &EnrichedItem,
    target: &EnrichedItem,
    tickers: &[String],
) -> ServiceResult<String> {
    let prompt = prompts::format_rationale_prompt(
        &source.title,
        &source.summary,
        &target.title,
        &target.summary,
        &tickers.join(", "),
    );
    let raw = llm.complete(prompts::RATIONALE_SYSTEM_PROMPT, &prompt).await?;
    let parsed = parse_json_response(&raw)?;

    let rationale = parsed["rationale"].as_str().unwrap_or_default().trim();
    if rationale.is_empty() {
        return Err(ServiceError::new(
            ErrorCode::MissingRationale,
            "response carried no rationale",
        ));
    }
    if let Some(term) = prompts::find_forbidden_term(rationale) {
        return Err(ServiceError::new(
            ErrorCode::ForbiddenTerm,
            format!("rationale contains forbidden term: {}", term),
        ));
    }
    Ok(rationale.to_string())
}

fn mechanical_rationale(
    source: &EnrichedItem,
    target: &EnrichedItem,
    tickers: &[String],
    link_type: LinkType,
) -> String {
    format!(
        "Both signals carry structural exposure to {}. The newer {} signal {} the earlier {} signal.",
        tickers.join(", "),
        source.change_type,
        link_type,
        target.change_type,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_classes_reinforce() {
        assert_eq!(
            decide_link_type(ChangeType::Reinforcing, ChangeType::Reinforcing),
            LinkType::Reinforces
        );
        assert_eq!(
            decide_link_type(ChangeType::Neutral, ChangeType::Neutral),
            LinkType::Reinforces
        );
    }

    #[test]
    fn test_opposing_pair_contradicts() {
        assert_eq!(
            decide_link_type(ChangeType::Reinforcing, ChangeType::Friction),
            LinkType::Contradicts
        );
        assert_eq!(
            decide_link_type(ChangeType::Friction, ChangeType::Reinforcing),
            LinkType::Contradicts
        );
    }

    #[test]
    fn test_other_combinations_extend() {
        assert_eq!(
            decide_link_type(ChangeType::EarlySignal, ChangeType::Reinforcing),
            LinkType::Extends
        );
        assert_eq!(
            decide_link_type(ChangeType::Neutral, ChangeType::Friction),
            LinkType::Extends
        );
        assert_eq!(
            decide_link_type(ChangeType::EarlySignal, ChangeType::Neutral),
            LinkType::Extends
        );
    }
}
