use thiserror::Error;

/// The only failure text a user ever sees for a non-validation failure.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Failed to generate the audit. Please try again or check your API key.";

pub const VALIDATION_MESSAGE: &str =
    "Please upload at least one image and provide a business description.";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("image '{file_name}' could not be encoded: {reason}")]
    Encoding { file_name: String, reason: String },

    #[error("model returned no text")]
    EmptyResponse,

    #[error("model output is not a valid audit report: {0}")]
    MalformedResponse(String),

    #[error("model output violates the report schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("audit cancelled")]
    Cancelled,

    #[error("audit exceeded its deadline")]
    TimedOut,
}

impl AuditError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::Validation(_) => "validation",
            AuditError::Encoding { .. } => "encoding",
            AuditError::EmptyResponse => "empty_response",
            AuditError::MalformedResponse(_) => "malformed_response",
            AuditError::SchemaViolation(_) => "schema_violation",
            AuditError::Transport(_) => "transport",
            AuditError::Cancelled => "cancelled",
            AuditError::TimedOut => "timed_out",
        }
    }

    /// Validation messages are shown inline; everything else collapses to
    /// [`GENERIC_FAILURE_MESSAGE`].
    pub fn is_user_visible(&self) -> bool {
        matches!(self, AuditError::Validation(_))
    }

    pub fn user_message(&self) -> &str {
        match self {
            AuditError::Validation(message) => message,
            _ => GENERIC_FAILURE_MESSAGE,
        }
    }

    pub(crate) fn transport(err: impl Into<anyhow::Error>) -> Self {
        AuditError::Transport(error_chain_text(&err.into(), 1024))
    }
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
