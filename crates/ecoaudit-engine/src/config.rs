use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_TEMPERATURE: f64 = 0.4;

const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
const MIN_REQUEST_TIMEOUT_S: f64 = 15.0;
const MAX_REQUEST_TIMEOUT_S: f64 = 300.0;

/// Everything the outbound call needs, passed explicitly to whoever issues
/// it. There is no process-wide client.
#[derive(Clone, PartialEq)]
pub struct AuditConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub temperature: f64,
    pub request_timeout: Duration,
}

impl fmt::Debug for AuditConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl AuditConfig {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads `GEMINI_API_KEY` (then `GOOGLE_API_KEY`, then `API_KEY`),
    /// `GEMINI_API_BASE`, `ECOAUDIT_MODEL` and `ECOAUDIT_REQUEST_TIMEOUT_S`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::new(
            non_empty("GEMINI_API_KEY")
                .or_else(|| non_empty("GOOGLE_API_KEY"))
                .or_else(|| non_empty("API_KEY")),
        );
        if let Some(api_base) = non_empty("GEMINI_API_BASE") {
            config = config.with_api_base(api_base);
        }
        if let Some(model) = non_empty("ECOAUDIT_MODEL") {
            config = config.with_model(model);
        }
        let timeout_s = non_empty("ECOAUDIT_REQUEST_TIMEOUT_S")
            .and_then(|value| value.parse::<f64>().ok());
        config.request_timeout = clamp_request_timeout(timeout_s);
        config
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into().trim().to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

/// Default 90 s, bounded to 15-300 s. Non-finite input counts as unset.
pub fn clamp_request_timeout(seconds: Option<f64>) -> Duration {
    let seconds = seconds
        .filter(|value| value.is_finite())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
        .clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S);
    Duration::from_secs_f64(seconds)
}
