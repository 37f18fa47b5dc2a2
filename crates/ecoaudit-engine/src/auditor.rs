use std::path::{Path, PathBuf};
use std::sync::Arc;

use ecoaudit_contracts::events::{now_utc_iso, AuditEvent, EventWriter};
use ecoaudit_contracts::images::UploadedImage;
use ecoaudit_contracts::receipts::{
    build_receipt, receipt_file_name, write_receipt, AuditReceipt, ImageDigest, ReceiptOutcome,
};
use ecoaudit_contracts::report::AuditReport;
use serde_json::{json, Map, Value};

use crate::cancel::CancelToken;
use crate::config::AuditConfig;
use crate::encoder::encode_images;
use crate::error::{error_chain_text, truncate_text, AuditError};
use crate::parser::parse_report;
use crate::request::{build_request, check_preconditions};
use crate::session::AuditJob;
use crate::transport::{AuditTransport, GeminiTransport};

#[derive(Debug, Clone, PartialEq)]
pub struct AuditOutput {
    pub audit_id: String,
    pub report: AuditReport,
    pub receipt_path: Option<PathBuf>,
}

/// Runs one audit attempt end to end: encode, build, one outbound call,
/// parse and validate.
pub struct Auditor {
    config: AuditConfig,
    transport: Arc<dyn AuditTransport>,
    events: Option<EventWriter>,
    receipts_dir: Option<PathBuf>,
}

#[derive(Default)]
struct AttemptRecord {
    images: Vec<ImageDigest>,
    provider_request: Value,
    response_text: Option<String>,
    response_metadata: Map<String, Value>,
}

impl Auditor {
    pub fn new(config: AuditConfig, transport: Arc<dyn AuditTransport>) -> Self {
        Self {
            config,
            transport,
            events: None,
            receipts_dir: None,
        }
    }

    pub fn gemini(config: AuditConfig) -> Self {
        let transport = Arc::new(GeminiTransport::new(&config));
        Self::new(config, transport)
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_receipts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.receipts_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn receipts_dir(&self) -> Option<&Path> {
        self.receipts_dir.as_deref()
    }

    pub fn run_job(&self, job: &AuditJob) -> Result<AuditReport, AuditError> {
        self.audit(
            job.ticket.audit_id(),
            &job.images,
            &job.description,
            &job.cancel,
        )
        .map(|output| output.report)
    }

    pub fn audit(
        &self,
        audit_id: &str,
        images: &[UploadedImage],
        description: &str,
        cancel: &CancelToken,
    ) -> Result<AuditOutput, AuditError> {
        check_preconditions(images.len(), description)?;

        let started_at = now_utc_iso();
        let mut record = AttemptRecord::default();
        let result = self.execute(audit_id, images, description, cancel, &mut record);
        let finished_at = now_utc_iso();

        let receipt_path = self.write_receipt(audit_id, &started_at, &finished_at, record, &result);
        result.map(|report| AuditOutput {
            audit_id: audit_id.to_string(),
            report,
            receipt_path,
        })
    }

    fn execute(
        &self,
        audit_id: &str,
        images: &[UploadedImage],
        description: &str,
        cancel: &CancelToken,
        record: &mut AttemptRecord,
    ) -> Result<AuditReport, AuditError> {
        let parts = encode_images(images, cancel)?;
        record.images = parts.iter().map(|part| part.digest()).collect();

        let request = build_request(&parts, description, &self.config)?;
        drop(parts);
        record.provider_request = json!({
            "endpoint": request.endpoint,
            "payload": request.payload,
        });

        self.emit(
            AuditEvent::AuditRequestSent,
            json!({
                "audit_id": audit_id,
                "transport": self.transport.name(),
                "model": request.model,
                "images": record.images.len(),
                "temperature": self.config.temperature,
            }),
        );
        let reply = self.transport.send(&request, cancel)?;
        record.response_text = reply.text.clone();
        record.response_metadata = reply.metadata.clone();
        self.emit(
            AuditEvent::AuditResponseReceived,
            json!({
                "audit_id": audit_id,
                "has_text": reply.text.is_some(),
                "metadata": Value::Object(reply.metadata),
            }),
        );

        parse_report(reply.text.as_deref())
    }

    fn write_receipt(
        &self,
        audit_id: &str,
        started_at: &str,
        finished_at: &str,
        record: AttemptRecord,
        result: &Result<AuditReport, AuditError>,
    ) -> Option<PathBuf> {
        let dir = self.receipts_dir.as_ref()?;
        let outcome = match result {
            Ok(report) => ReceiptOutcome::Completed {
                eco_score: report.eco_score,
                observations: report.key_observations.len(),
                steps: report.actionable_steps.len(),
            },
            Err(err) => ReceiptOutcome::Failed {
                error_kind: err.kind().to_string(),
                error_detail: truncate_text(&err.to_string(), 2048),
            },
        };
        let mut provider_request = record.provider_request;
        if let Value::Object(request) = &mut provider_request {
            if !record.response_metadata.is_empty() {
                request.insert(
                    "response_metadata".to_string(),
                    Value::Object(record.response_metadata),
                );
            }
        }
        let receipt = AuditReceipt {
            audit_id: audit_id.to_string(),
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            started_at: started_at.to_string(),
            finished_at: finished_at.to_string(),
            images: record.images,
            provider_request,
            response_text: record.response_text.filter(|_| result.is_err()),
            outcome,
        };
        let path = dir.join(receipt_file_name(audit_id));
        match write_receipt(&path, &build_receipt(&receipt)) {
            Ok(()) => Some(path),
            Err(err) => {
                self.emit(
                    AuditEvent::ReceiptWriteFailed,
                    json!({
                        "audit_id": audit_id,
                        "path": path.to_string_lossy(),
                        "error": error_chain_text(&err, 512),
                    }),
                );
                None
            }
        }
    }

    fn emit(&self, event: AuditEvent, payload: Value) {
        if let Some(events) = self.events.as_ref() {
            let _ = events.emit(event, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use ecoaudit_contracts::events::EventWriter;
    use ecoaudit_contracts::images::{ImageSet, NewImage};
    use ecoaudit_contracts::receipts::read_receipt;
    use ecoaudit_contracts::receipts::ReceiptOutcome;
    use serde_json::{json, Value};

    use super::Auditor;
    use crate::cancel::CancelToken;
    use crate::config::AuditConfig;
    use crate::error::AuditError;
    use crate::test_support::{candidate_envelope, sample_report_json, serve_once, FakeTransport};
    use crate::transport::TransportReply;

    fn images(names: &[&str]) -> ImageSet {
        let mut set = ImageSet::new();
        set.add(
            names
                .iter()
                .enumerate()
                .map(|(idx, name)| NewImage::from_bytes(*name, None, vec![idx as u8 + 1])),
        );
        set
    }

    #[test]
    fn successful_audit_writes_receipt_without_image_bytes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let fake = Arc::new(FakeTransport::with_text(&sample_report_json().to_string()));
        let auditor = Auditor::new(AuditConfig::new(Some("k".to_string())), fake.clone())
            .with_receipts_dir(temp.path());
        let set = images(&["bar.png", "kitchen.jpg"]);

        let output = auditor.audit("audit-1", set.as_slice(), "Tapas bar", &CancelToken::new())?;
        assert_eq!(serde_json::to_value(&output.report)?, sample_report_json());
        assert_eq!(fake.calls(), 1);

        let sent = fake.last_request().map(|request| request.payload).unwrap_or(Value::Null);
        let parts = sent["contents"][0]["parts"].as_array().cloned().unwrap_or_default();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/jpeg"));

        let receipt_path = output.receipt_path.clone().unwrap_or_default();
        let receipt = read_receipt(&receipt_path)?;
        assert_eq!(receipt.audit_id, "audit-1");
        assert_eq!(receipt.images.len(), 2);
        assert_eq!(receipt.images[0].bytes, 1);
        assert_eq!(
            receipt.outcome,
            ReceiptOutcome::Completed {
                eco_score: 42,
                observations: 1,
                steps: 1,
            }
        );
        assert_eq!(receipt.response_text, None);
        let stored = fs::read_to_string(&receipt_path)?;
        assert!(!stored.contains("Switch to reusable containers"));
        assert!(!stored.contains("Plastic use"));
        assert_eq!(
            receipt.provider_request["payload"]["contents"][0]["parts"][0]["inlineData"]["data"],
            json!("<omitted>")
        );
        Ok(())
    }

    #[test]
    fn validation_failure_issues_no_call() {
        let fake = Arc::new(FakeTransport::with_text("{}"));
        let auditor = Auditor::new(AuditConfig::new(None), fake.clone());
        let set = images(&["a.png"]);

        let blank = auditor.audit("a", set.as_slice(), "   ", &CancelToken::new());
        let none = auditor.audit("b", &[], "Bakery", &CancelToken::new());
        assert!(matches!(blank, Err(AuditError::Validation(_))));
        assert!(matches!(none, Err(AuditError::Validation(_))));
        assert_eq!(fake.calls(), 0);
    }

    #[test]
    fn encoding_failure_issues_no_call() -> anyhow::Result<()> {
        let fake = Arc::new(FakeTransport::with_text("{}"));
        let auditor = Auditor::new(AuditConfig::new(None), fake.clone());
        let mut set = images(&["a.png"]);
        set.add([NewImage::from_path("/missing/photo.jpg")]);

        let result = auditor.audit("a", set.as_slice(), "Bakery", &CancelToken::new());
        assert!(matches!(result, Err(AuditError::Encoding { .. })));
        assert_eq!(fake.calls(), 0);
        Ok(())
    }

    #[test]
    fn empty_reply_is_recorded_as_failure() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let fake = Arc::new(FakeTransport::replying(vec![Ok(TransportReply::default())]));
        let auditor = Auditor::new(AuditConfig::new(None), fake)
            .with_receipts_dir(temp.path())
            .with_events(EventWriter::new(temp.path().join("events.jsonl"), "s-1"));
        let set = images(&["a.png"]);

        let result = auditor.audit("audit-9", set.as_slice(), "Bakery", &CancelToken::new());
        assert!(matches!(result, Err(AuditError::EmptyResponse)));

        let receipt = read_receipt(&temp.path().join("receipt-audit-9.json"))?;
        assert_eq!(
            receipt.outcome,
            ReceiptOutcome::Failed {
                error_kind: "empty_response".to_string(),
                error_detail: "model returned no text".to_string(),
            }
        );
        let events = fs::read_to_string(temp.path().join("events.jsonl"))?;
        let types = events
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect::<Vec<_>>();
        assert_eq!(types, vec!["audit_request_sent", "audit_response_received"]);
        Ok(())
    }

    #[test]
    fn malformed_reply_keeps_raw_text_for_diagnosis() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let fake = Arc::new(FakeTransport::with_text("Sorry, I can't help with that."));
        let auditor = Auditor::new(AuditConfig::new(None), fake).with_receipts_dir(temp.path());
        let set = images(&["a.png"]);

        let result = auditor.audit("audit-3", set.as_slice(), "Bakery", &CancelToken::new());
        assert!(matches!(result, Err(AuditError::MalformedResponse(_))));

        let receipt = read_receipt(&temp.path().join("receipt-audit-3.json"))?;
        assert_eq!(
            receipt.response_text.as_deref(),
            Some("Sorry, I can't help with that.")
        );
        Ok(())
    }

    #[test]
    fn transport_error_propagates() {
        let fake = Arc::new(FakeTransport::replying(vec![Err(AuditError::Transport(
            "quota exceeded".to_string(),
        ))]));
        let auditor = Auditor::new(AuditConfig::new(None), fake);
        let set = images(&["a.png"]);
        let result = auditor.audit("a", set.as_slice(), "Bakery", &CancelToken::new());
        assert!(matches!(result, Err(AuditError::Transport(ref detail)) if detail == "quota exceeded"));
    }

    #[test]
    fn end_to_end_over_http() -> anyhow::Result<()> {
        let envelope = candidate_envelope(&sample_report_json().to_string());
        let server = serve_once(200, envelope.to_string())?;
        let config = AuditConfig::new(Some("k".to_string())).with_api_base(server.base.clone());
        let auditor = Auditor::gemini(config);
        let set = images(&["floor.png"]);

        let output = auditor.audit("a", set.as_slice(), "Print shop", &CancelToken::new())?;
        assert_eq!(output.report.eco_score, 42);
        assert_eq!(output.receipt_path, None);

        let captured = server.captured.recv_timeout(std::time::Duration::from_secs(5))?;
        assert!(captured.body.contains("\"responseMimeType\":\"application/json\""));
        assert!(captured.body.contains("\"temperature\":0.4"));
        Ok(())
    }
}
