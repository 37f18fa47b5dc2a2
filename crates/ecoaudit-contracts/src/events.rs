use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every diagnostic event the session and the auditor write. Serialized as
/// the snake_case `type` field of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    SessionStarted,
    ImagesAdded,
    ImageRemoved,
    DescriptionUpdated,
    ActionIgnored,
    AuditRejected,
    AuditStarted,
    AuditRequestSent,
    AuditResponseReceived,
    AuditCompleted,
    AuditFailed,
    AuditResultDiscarded,
    AuditCancelRequested,
    ReceiptWriteFailed,
    SessionReset,
}

impl AuditEvent {
    pub const fn as_str(self) -> &'static str {
        match self {
            AuditEvent::SessionStarted => "session_started",
            AuditEvent::ImagesAdded => "images_added",
            AuditEvent::ImageRemoved => "image_removed",
            AuditEvent::DescriptionUpdated => "description_updated",
            AuditEvent::ActionIgnored => "action_ignored",
            AuditEvent::AuditRejected => "audit_rejected",
            AuditEvent::AuditStarted => "audit_started",
            AuditEvent::AuditRequestSent => "audit_request_sent",
            AuditEvent::AuditResponseReceived => "audit_response_received",
            AuditEvent::AuditCompleted => "audit_completed",
            AuditEvent::AuditFailed => "audit_failed",
            AuditEvent::AuditResultDiscarded => "audit_result_discarded",
            AuditEvent::AuditCancelRequested => "audit_cancel_requested",
            AuditEvent::ReceiptWriteFailed => "receipt_write_failed",
            AuditEvent::SessionReset => "session_reset",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only JSONL log for one audit session.
///
/// Each line is the caller's object payload plus the reserved fields
/// `type`, `session_id`, `seq` and `ts`, which always win over payload keys.
/// `seq` counts up per session and matches file order, including lines
/// written from the audit worker through a clone.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: Mutex::new(0),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Appends one line and returns the record as written.
    pub fn emit(&self, event: AuditEvent, payload: Value) -> anyhow::Result<Value> {
        let Value::Object(mut record) = payload else {
            anyhow::bail!("{event} payload must be a JSON object");
        };

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }

        let mut next_seq = self
            .inner
            .next_seq
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        record.insert("type".to_string(), Value::from(event.as_str()));
        record.insert(
            "session_id".to_string(),
            Value::from(self.inner.session_id.as_str()),
        );
        record.insert("seq".to_string(), Value::from(*next_seq));
        record.insert("ts".to_string(), Value::from(now_utc_iso()));

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed appending to {}", self.inner.path.display()))?;
        *next_seq += 1;

        Ok(Value::Object(record))
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
