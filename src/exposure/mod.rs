//! Exposure mapping stage: one analysis in, a set of ticker exposures (or an
//! explicit skip reason) out.

use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use crate::analysis::DIMENSIONS;
use crate::llm::{parse_json_response, ErrorCode, LlmClient, ServiceError, ServiceResult};
use crate::prompts;
use crate::storage::{ExposureRecord, MappableAnalysis};

const MAX_RATIONALE_CHARS: usize = 300;
const MAX_EXPOSURES: usize = 5;

const EXPOSURE_TYPES: &[&str] = &["direct", "indirect", "contextual"];
const BUSINESS_ROLES: &[&str] = &[
    "infrastructure_operator",
    "upstream_supplier",
    "downstream_adopter",
    "platform_intermediary",
    "regulated_entity",
    "capital_allocator",
    "other",
];
const EXPOSURE_STRENGTHS: &[&str] = &["core", "material", "peripheral"];
const CONFIDENCE_LEVELS: &[&str] = &["high", "medium", "low"];

/// Map one analysis to company exposures through the external mapping
/// service.
pub async fn map_exposures(
    llm: &LlmClient,
    analysis: &MappableAnalysis,
    mapping_version: &str,
) -> ServiceResult<ExposureRecord> {
    let prompt = prompts::format_exposure_prompt(
        &analysis.summary,
        &analysis.dimensions,
        analysis.change_type.as_str(),
        &analysis.time_horizon,
        &analysis.importance,
        &analysis.key_entities,
        &analysis.title,
        &analysis.source_name,
        analysis.source_type.as_str(),
    );

    let raw = llm
        .complete(prompts::EXPOSURE_SYSTEM_PROMPT, &prompt)
        .await?;
    let parsed = parse_json_response(&raw)?;
    validate_mapping(&parsed)?;

    let skipped_reason = parsed["skipped_reason"].as_str().map(|s| s.to_string());

    Ok(ExposureRecord {
        id: Uuid::new_v4().to_string(),
        analysis_id: analysis.analysis_id.clone(),
        exposures: parsed["exposures"].clone(),
        skipped_reason,
        mapped_at: Utc::now(),
        mapping_version: mapping_version.to_string(),
    })
}

fn uncertain(message: impl Into<String>) -> ServiceError {
    ServiceError::new(ErrorCode::MappingUncertain, message)
}

/// Validate a mapping response. Exactly one of a non-empty exposures array or
/// a skipped_reason string must be present.
pub fn validate_mapping(value: &serde_json::Value) -> ServiceResult<()> {
    let exposures = value["exposures"]
        .as_array()
        .ok_or_else(|| uncertain("exposures must be an array"))?;
    let skipped = value["skipped_reason"]
        .as_str()
        .filter(|s| !s.trim().is_empty());

    match (exposures.is_empty(), skipped) {
        (true, None) => {
            return Err(uncertain(
                "empty exposures require a skipped_reason",
            ))
        }
        (false, Some(_)) => {
            return Err(uncertain(
                "exposures and skipped_reason are mutually exclusive",
            ))
        }
        _ => {}
    }

    if exposures.len() > MAX_EXPOSURES {
        return Err(uncertain(format!(
            "exposures exceeds {} entries",
            MAX_EXPOSURES
        )));
    }

    let mut tickers = HashSet::new();
    for exposure in exposures {
        let ticker = exposure["ticker"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| uncertain("ticker is required"))?;
        if !tickers.insert(ticker.to_string()) {
            return Err(uncertain(format!("duplicate ticker: {}", ticker)));
        }

        check_enum(exposure, "exposure_type", EXPOSURE_TYPES)?;
        check_enum(exposure, "business_role", BUSINESS_ROLES)?;
        check_enum(exposure, "exposure_strength", EXPOSURE_STRENGTHS)?;
        check_enum(exposure, "confidence", CONFIDENCE_LEVELS)?;

        let implicated = exposure["dimensions_implicated"]
            .as_array()
            .ok_or_else(|| uncertain("dimensions_implicated must be an array"))?;
        for dim in implicated {
            let name = dim.as_str().unwrap_or_default();
            if !DIMENSIONS.contains(&name) {
                return Err(uncertain(format!("Unknown dimension: {}", name)));
            }
        }

        let rationale = exposure["rationale"].as_str().unwrap_or_default().trim();
        if rationale.is_empty() {
            return Err(uncertain(format!("rationale missing for {}", ticker)));
        }
        if rationale.chars().count() > MAX_RATIONALE_CHARS {
            return Err(uncertain(format!(
                "rationale for {} exceeds {} characters",
                ticker, MAX_RATIONALE_CHARS
            )));
        }
        if let Some(term) = prompts::find_forbidden_term(rationale) {
            return Err(uncertain(format!(
                "rationale for {} contains forbidden term: {}",
                ticker, term
            )));
        }
    }

    Ok(())
}

fn check_enum(
    exposure: &serde_json::Value,
    field: &str,
    allowed: &[&str],
) -> ServiceResult<()> {
    let v = exposure[field].as_str().unwrap_or_default();
    if !allowed.contains(&v) {
        return Err(uncertain(format!("Invalid {}: {}", field, v)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_exposure() -> serde_json::Value {
        json!({
            "ticker": "TSM",
            "exposure_type": "direct",
            "business_role": "upstream_supplier",
            "exposure_strength": "core",
            "confidence": "high",
            "dimensions_implicated": ["compute_and_computational_paradigms"],
            "rationale": "Sole manufacturer of the advanced nodes described."
        })
    }

    #[test]
    fn test_valid_mapping_passes() {
        let v = json!({"exposures": [valid_exposure()], "skipped_reason": null});
        assert!(validate_mapping(&v).is_ok());
    }

    #[test]
    fn test_skip_with_reason_passes() {
        let v = json!({"exposures": [], "skipped_reason": "No listed companies implicated"});
        assert!(validate_mapping(&v).is_ok());
    }

    #[test]
    fn test_empty_without_reason_rejected() {
        let v = json!({"exposures": [], "skipped_reason": null});
        let err = validate_mapping(&v).unwrap_err();
        assert_eq!(err.code, ErrorCode::MappingUncertain);
    }

    #[test]
    fn test_exposures_and_reason_mutually_exclusive() {
        let v = json!({"exposures": [valid_exposure()], "skipped_reason": "also skipped"});
        assert!(validate_mapping(&v).is_err());
    }

    #[test]
    fn test_duplicate_ticker_rejected() {
        let v = json!({"exposures": [valid_exposure(), valid_exposure()], "skipped_reason": null});
        assert!(validate_mapping(&v).is_err());
    }

    #[test]
    fn test_invalid_business_role_rejected() {
        let mut e = valid_exposure();
        e["business_role"] = json!("market_maker");
        let v = json!({"exposures": [e], "skipped_reason": null});
        assert!(validate_mapping(&v).is_err());
    }

    #[test]
    fn test_rationale_length_cap() {
        let mut e = valid_exposure();
        e["rationale"] = json!("x".repeat(301));
        let v = json!({"exposures": [e], "skipped_reason": null});
        assert!(validate_mapping(&v).is_err());
    }

    #[test]
    fn test_rationale_forbidden_term_rejected() {
        let mut e = valid_exposure();
        e["rationale"] = json!("Strong upside from fab demand.");
        let v = json!({"exposures": [e], "skipped_reason": null});
        let err = validate_mapping(&v).unwrap_err();
        assert!(err.message.contains("upside"));
    }
}
