use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{Map, Value};

use crate::cancel::CancelToken;
use crate::config::AuditConfig;
use crate::error::{truncate_text, AuditError};
use crate::parser::extract_response_text;
use crate::request::AuditRequest;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransportReply {
    /// Concatenated text of the first candidate; `None` when the model
    /// produced nothing.
    pub text: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Issues exactly one outbound call per `send`. No retries, no caching.
pub trait AuditTransport: Send + Sync {
    fn name(&self) -> &str;
    fn send(&self, request: &AuditRequest, cancel: &CancelToken)
        -> Result<TransportReply, AuditError>;
}

pub struct GeminiTransport {
    http: HttpClient,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl GeminiTransport {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            http: HttpClient::new(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout,
        }
    }

    fn effective_timeout(&self, cancel: &CancelToken) -> Duration {
        match cancel.remaining() {
            Some(remaining) => remaining.min(self.request_timeout),
            None => self.request_timeout,
        }
    }
}

impl AuditTransport for GeminiTransport {
    fn name(&self) -> &str {
        "gemini"
    }

    /// The blocking call runs on a worker thread so the caller can abandon
    /// it when the token is cancelled or its deadline passes.
    fn send(
        &self,
        request: &AuditRequest,
        cancel: &CancelToken,
    ) -> Result<TransportReply, AuditError> {
        let Some(api_key) = self.api_key.clone() else {
            return Err(AuditError::Transport(
                "GEMINI_API_KEY or GOOGLE_API_KEY or API_KEY not set".to_string(),
            ));
        };
        cancel.check()?;

        let timeout = self.effective_timeout(cancel);
        let http = self.http.clone();
        let endpoint = request.endpoint.clone();
        let payload = request.payload.clone();
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name("ecoaudit-gemini".to_string())
            .spawn(move || {
                let result = http
                    .post(&endpoint)
                    .header("x-goog-api-key", api_key)
                    .timeout(timeout)
                    .json(&payload)
                    .send()
                    .with_context(|| format!("Gemini request failed ({endpoint})"))
                    .and_then(|response| response_json_or_error("Gemini", response));
                let _ = tx.send(result);
            })
            .map_err(AuditError::transport)?;

        loop {
            match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(Ok(envelope)) => return Ok(reply_from_envelope(&envelope)),
                Ok(Err(err)) => {
                    cancel.check()?;
                    return Err(AuditError::transport(err));
                }
                Err(mpsc::RecvTimeoutError::Timeout) => cancel.check()?,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(AuditError::Transport(
                        "Gemini worker exited without a response".to_string(),
                    ))
                }
            }
        }
    }
}

fn reply_from_envelope(envelope: &Value) -> TransportReply {
    let mut metadata = Map::new();
    let first_candidate = envelope
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first());
    if let Some(reason) = first_candidate
        .and_then(|candidate| candidate.get("finishReason"))
        .cloned()
    {
        metadata.insert("finish_reason".to_string(), reason);
    }
    if let Some(reason) = envelope
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .cloned()
    {
        metadata.insert("block_reason".to_string(), reason);
    }
    if let Some(usage) = envelope.get("usageMetadata").cloned() {
        metadata.insert("usage_metadata".to_string(), usage);
    }
    if let Some(version) = envelope.get("modelVersion").cloned() {
        metadata.insert("model_version".to_string(), version);
    }
    TransportReply {
        text: extract_response_text(envelope),
        metadata,
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> anyhow::Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        anyhow::bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}
