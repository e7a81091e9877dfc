use serde::{Deserialize, Serialize};

/// Request body for the messages endpoint.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub system: String,
    pub messages: Vec<Message>,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Response body for the messages endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessagesResponse {
    pub content: Vec<ContentBlock>,
}

/// A content block in the response. Only text blocks are consumed.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default)]
    pub text: String,
}

/// Typed error returned by an external service boundary.
///
/// Every stage classifies outcomes through these codes: `ApiError` is the
/// transient/systemic code that halts the current batch without consuming
/// retry budget; everything else is subject-specific and does consume budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// True when the error signals the service itself is unavailable rather
    /// than this subject being unprocessable.
    pub fn is_transient(&self) -> bool {
        self.code.is_transient()
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Error codes carried by external-service failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Transient/systemic unavailability (outage, rate limit, billing).
    ApiError,
    /// The service response was not parseable JSON.
    ParseError,
    /// Classification output failed schema validation.
    ClassificationUncertain,
    /// Exposure mapping output failed schema validation.
    MappingUncertain,
    /// Synthesis response carried no usable text.
    EmptySynthesis,
    /// Synthesis text contained a forbidden term.
    ForbiddenTerm,
    /// Rationale response missing the expected key.
    MissingRationale,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ApiError => "api_error",
            ErrorCode::ParseError => "parse_error",
            ErrorCode::ClassificationUncertain => "classification_uncertain",
            ErrorCode::MappingUncertain => "mapping_uncertain",
            ErrorCode::EmptySynthesis => "empty_synthesis",
            ErrorCode::ForbiddenTerm => "forbidden_term",
            ErrorCode::MissingRationale => "missing_rationale",
        }
    }

    /// Only `api_error` halts a stage batch without consuming retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCode::ApiError)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transport failures are always the transient/systemic code: the service
/// itself is unreachable, not this subject unprocessable.
impl From<crate::error::LlmError> for ServiceError {
    fn from(e: crate::error::LlmError) -> Self {
        ServiceError::new(ErrorCode::ApiError, e.to_string())
    }
}

/// Result type for external-service boundaries.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Extract and parse JSON from a completion response.
///
/// Responses may wrap the JSON in markdown code fences; those lines are
/// stripped before parsing.
pub fn parse_json_response(raw: &str) -> Result<serde_json::Value, ServiceError> {
    let text = raw.trim();
    let cleaned = if text.starts_with("```") {
        text.lines()
            .filter(|line| !line.trim_start().starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        text.to_string()
    };

    serde_json::from_str(cleaned.trim())
        .map_err(|e| ServiceError::new(ErrorCode::ParseError, format!("Invalid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let value = parse_json_response(r#"{"key": "value"}"#).unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = "```json\n{\"key\": \"value\"}\n```";
        let value = parse_json_response(raw).unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn test_parse_fenced_json_no_language_tag() {
        let raw = "```\n{\"n\": 3}\n```";
        let value = parse_json_response(raw).unwrap();
        assert_eq!(value["n"], 3);
    }

    #[test]
    fn test_parse_invalid_json_is_parse_error() {
        let err = parse_json_response("not json at all").unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_only_api_error_is_transient() {
        assert!(ErrorCode::ApiError.is_transient());
        assert!(!ErrorCode::ParseError.is_transient());
        assert!(!ErrorCode::ClassificationUncertain.is_transient());
        assert!(!ErrorCode::MappingUncertain.is_transient());
        assert!(!ErrorCode::ForbiddenTerm.is_transient());
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::ApiError.to_string(), "api_error");
        assert_eq!(ErrorCode::ParseError.to_string(), "parse_error");
        assert_eq!(
            ErrorCode::ClassificationUncertain.to_string(),
            "classification_uncertain"
        );
    }
}
