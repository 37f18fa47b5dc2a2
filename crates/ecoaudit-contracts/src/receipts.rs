use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Stands in for the inline payload of one image in a stored receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDigest {
    pub mime_type: String,
    pub sha256: String,
    pub bytes: u64,
}

/// How an attempt ended. A completed attempt records only the shape of the
/// report; the report itself is not kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReceiptOutcome {
    Completed {
        eco_score: u8,
        observations: usize,
        steps: usize,
    },
    Failed {
        error_kind: String,
        error_detail: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReceipt {
    pub audit_id: String,
    pub model: String,
    pub temperature: f64,
    pub started_at: String,
    pub finished_at: String,
    #[serde(default)]
    pub images: Vec<ImageDigest>,
    pub provider_request: Value,
    /// Raw model text, kept only for failed attempts.
    pub response_text: Option<String>,
    pub outcome: ReceiptOutcome,
}

pub fn receipt_file_name(audit_id: &str) -> String {
    format!("receipt-{audit_id}.json")
}

pub fn build_receipt(receipt: &AuditReceipt) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    let body = serde_json::to_value(receipt).unwrap_or(Value::Null);
    if let Value::Object(fields) = body {
        for (key, value) in fields {
            let value = if key == "provider_request" {
                sanitize_payload(&value)
            } else {
                value
            };
            root.insert(key, value);
        }
    }
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)
        .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

pub fn read_receipt(path: &Path) -> anyhow::Result<AuditReceipt> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid receipt {}", path.display()))
}

/// Replaces inline binary payloads so receipts stay small and never carry
/// image bytes or credentials.
fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(lowered.as_str(), "data" | "key" | "api_key" | "x-goog-api-key") {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
