use ecoaudit_contracts::report::{AuditReport, RawAuditReport};
use serde_json::Value;

use crate::error::AuditError;

/// Joins the text parts of the first candidate, skipping thought parts.
/// Blank output counts as no output.
pub fn extract_response_text(envelope: &Value) -> Option<String> {
    let parts = envelope
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)?;

    let text = parts
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();
    if text.trim().is_empty() {
        return None;
    }
    Some(text)
}

/// Structural parse followed by value validation.
///
/// - no text: [`AuditError::EmptyResponse`]
/// - not JSON, or JSON of the wrong shape: [`AuditError::MalformedResponse`]
/// - right shape, out-of-contract values: [`AuditError::SchemaViolation`]
pub fn parse_report(text: Option<&str>) -> Result<AuditReport, AuditError> {
    let Some(text) = text.filter(|value| !value.trim().is_empty()) else {
        return Err(AuditError::EmptyResponse);
    };
    let body = strip_code_fence(text);
    let raw: RawAuditReport = serde_json::from_str(body)
        .map_err(|err| AuditError::MalformedResponse(err.to_string()))?;
    raw.validate().map_err(AuditError::SchemaViolation)
}

/// Unwraps a markdown fence and its optional `json` tag. The fences may sit
/// on their own lines or hug the body.
fn strip_code_fence(text: &str) -> &str {
    let raw = text.trim();
    let Some(inner) = raw.strip_prefix("```") else {
        return raw;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    let inner = inner.trim_start_matches([' ', '\t']);
    let inner = match inner.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &inner[4..],
        _ => inner,
    };
    inner.trim()
}
