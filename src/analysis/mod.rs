//! Classification stage: one item in, one structured analysis out.
//!
//! Calls the remote classification service and validates the response
//! against the schema before anything is persisted. Validation failures
//! consume retry budget; transport failures do not.

use std::str::FromStr;

use chrono::Utc;
use uuid::Uuid;

use crate::llm::{parse_json_response, ErrorCode, LlmClient, ServiceError, ServiceResult};
use crate::prompts;
use crate::storage::{Analysis, ChangeType, NormalizedItem};

const MAX_SUMMARY_CHARS: usize = 500;
const MAX_KEY_ENTITIES: usize = 7;

pub const DIMENSIONS: &[&str] = &[
    "compute_and_computational_paradigms",
    "capital_flows_and_business_models",
    "energy_resources_and_physical_constraints",
    "technology_adoption_and_industrial_diffusion",
    "governance_regulation_and_societal_response",
];

const TIME_HORIZONS: &[&str] = &["short_term", "medium_term", "long_term"];
const IMPORTANCE_LEVELS: &[&str] = &["low", "medium", "high"];

/// Classify one item through the external classification service.
pub async fn classify_item(
    llm: &LlmClient,
    item: &NormalizedItem,
    analysis_version: &str,
) -> ServiceResult<Analysis> {
    let prompt = prompts::format_analysis_prompt(
        &item.title,
        &item.source_name,
        item.source_type.as_str(),
        &item.timestamp.to_rfc3339(),
        &item.content,
    );

    let raw = llm
        .complete(prompts::ANALYSIS_SYSTEM_PROMPT, &prompt)
        .await?;
    let parsed = parse_json_response(&raw)?;
    validate_classification(&parsed)?;

    let change_type = ChangeType::from_str(parsed["change_type"].as_str().unwrap_or_default())
        .map_err(|e| ServiceError::new(ErrorCode::ClassificationUncertain, e))?;

    Ok(Analysis {
        id: Uuid::new_v4().to_string(),
        item_id: item.id.clone(),
        dimensions: parsed["dimensions"].clone(),
        change_type,
        time_horizon: parsed["time_horizon"].as_str().unwrap_or_default().to_string(),
        summary: parsed["summary"].as_str().unwrap_or_default().trim().to_string(),
        importance: parsed["importance"].as_str().unwrap_or_default().to_string(),
        key_entities: parsed["key_entities"].clone(),
        analyzed_at: Utc::now(),
        analysis_version: analysis_version.to_string(),
    })
}

fn uncertain(message: impl Into<String>) -> ServiceError {
    ServiceError::new(ErrorCode::ClassificationUncertain, message)
}

/// Validate a classification response against the schema.
pub fn validate_classification(value: &serde_json::Value) -> ServiceResult<()> {
    let dimensions = value["dimensions"]
        .as_array()
        .ok_or_else(|| uncertain("dimensions must be an array"))?;
    if dimensions.is_empty() {
        return Err(uncertain("dimensions must not be empty"));
    }
    let mut has_primary = false;
    for dim in dimensions {
        let name = dim["dimension"]
            .as_str()
            .ok_or_else(|| uncertain("dimension name missing"))?;
        if !DIMENSIONS.contains(&name) {
            return Err(uncertain(format!("Unknown dimension: {}", name)));
        }
        match dim["relevance"].as_str() {
            Some("primary") => has_primary = true,
            Some("secondary") => {}
            other => {
                return Err(uncertain(format!(
                    "Invalid relevance for {}: {:?}",
                    name, other
                )))
            }
        }
    }
    if !has_primary {
        return Err(uncertain("at least one dimension must be primary"));
    }

    let change_type = value["change_type"].as_str().unwrap_or_default();
    if ChangeType::from_str(change_type).is_err() {
        return Err(uncertain(format!("Invalid change_type: {}", change_type)));
    }

    let horizon = value["time_horizon"].as_str().unwrap_or_default();
    if !TIME_HORIZONS.contains(&horizon) {
        return Err(uncertain(format!("Invalid time_horizon: {}", horizon)));
    }

    let importance = value["importance"].as_str().unwrap_or_default();
    if !IMPORTANCE_LEVELS.contains(&importance) {
        return Err(uncertain(format!("Invalid importance: {}", importance)));
    }

    let summary = value["summary"].as_str().unwrap_or_default().trim();
    if summary.is_empty() {
        return Err(uncertain("summary must not be empty"));
    }
    if summary.chars().count() > MAX_SUMMARY_CHARS {
        return Err(uncertain(format!(
            "summary exceeds {} characters",
            MAX_SUMMARY_CHARS
        )));
    }
    if let Some(term) = prompts::find_forbidden_term(summary) {
        return Err(uncertain(format!("summary contains forbidden term: {}", term)));
    }

    let entities = value["key_entities"]
        .as_array()
        .ok_or_else(|| uncertain("key_entities must be an array"))?;
    if entities.is_empty() {
        return Err(uncertain("key_entities must not be empty"));
    }
    if entities.len() > MAX_KEY_ENTITIES {
        return Err(uncertain(format!(
            "key_entities exceeds {} entries",
            MAX_KEY_ENTITIES
        )));
    }
    if !entities.iter().all(|e| e.is_string()) {
        return Err(uncertain("key_entities must be strings"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_response() -> serde_json::Value {
        json!({
            "dimensions": [
                {"dimension": "compute_and_computational_paradigms", "relevance": "primary"},
                {"dimension": "capital_flows_and_business_models", "relevance": "secondary"}
            ],
            "change_type": "reinforcing",
            "time_horizon": "medium_term",
            "summary": "A chipmaker expands fabrication capacity in a new region.",
            "importance": "medium",
            "key_entities": ["TSMC", "Arizona"]
        })
    }

    #[test]
    fn test_valid_classification_passes() {
        assert!(validate_classification(&valid_response()).is_ok());
    }

    #[test]
    fn test_empty_dimensions_rejected() {
        let mut v = valid_response();
        v["dimensions"] = json!([]);
        let err = validate_classification(&v).unwrap_err();
        assert_eq!(err.code, ErrorCode::ClassificationUncertain);
    }

    #[test]
    fn test_requires_one_primary_dimension() {
        let mut v = valid_response();
        v["dimensions"] = json!([
            {"dimension": "compute_and_computational_paradigms", "relevance": "secondary"}
        ]);
        assert!(validate_classification(&v).is_err());
    }

    #[test]
    fn test_unknown_dimension_rejected() {
        let mut v = valid_response();
        v["dimensions"] = json!([
            {"dimension": "vibes", "relevance": "primary"}
        ]);
        assert!(validate_classification(&v).is_err());
    }

    #[test]
    fn test_invalid_change_type_rejected() {
        let mut v = valid_response();
        v["change_type"] = json!("bullish");
        assert!(validate_classification(&v).is_err());
    }

    #[test]
    fn test_summary_length_cap() {
        let mut v = valid_response();
        v["summary"] = json!("x".repeat(501));
        assert!(validate_classification(&v).is_err());
        v["summary"] = json!("x".repeat(500));
        assert!(validate_classification(&v).is_ok());
    }

    #[test]
    fn test_summary_forbidden_term_rejected() {
        let mut v = valid_response();
        v["summary"] = json!("This is bullish for the sector.");
        let err = validate_classification(&v).unwrap_err();
        assert!(err.message.contains("bullish"));
    }

    #[test]
    fn test_empty_key_entities_rejected() {
        let mut v = valid_response();
        v["key_entities"] = json!([]);
        assert!(validate_classification(&v).is_err());
    }
}
