use ecoaudit_contracts::images::MAX_IMAGES;
use ecoaudit_contracts::schema::{audit_report_schema, RESPONSE_MIME_TYPE};
use serde_json::{json, Value};

use crate::config::AuditConfig;
use crate::encoder::EncodedImagePart;
use crate::error::{AuditError, VALIDATION_MESSAGE};

pub const SYSTEM_INSTRUCTION: &str =
    "You are a helpful expert consultant specialising in sustainability audits for small businesses.";

/// One fully shaped `generateContent` call.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRequest {
    pub model: String,
    pub endpoint: String,
    pub payload: Value,
}

impl AuditRequest {
    pub fn parts(&self) -> &[Value] {
        self.payload["contents"][0]["parts"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Local precondition for an audit; runs before any encoding or network
/// activity.
pub fn check_preconditions(image_count: usize, description: &str) -> Result<(), AuditError> {
    if image_count == 0 || description.trim().is_empty() {
        return Err(AuditError::Validation(VALIDATION_MESSAGE.to_string()));
    }
    if image_count > MAX_IMAGES {
        return Err(AuditError::Validation(format!(
            "An audit accepts at most {MAX_IMAGES} images."
        )));
    }
    Ok(())
}

pub fn audit_prompt(description: &str) -> String {
    format!(
        "You are an elite sustainability auditor for small and medium businesses (B2B).\n\
Analyze the attached photos of a business workspace or operation together with this description from the owner: \"{}\".\n\
\n\
Produce a specific, non-generic, data-informed sustainability audit:\n\
1. Inspect the photos for waste, energy inefficiency, material usage and layout issues.\n\
2. Use the description for context on how the business operates.\n\
3. Assign a realistic EcoScore from 0 to 100. Be strict but fair.\n\
4. Give observations that cite what is actually visible in the photos.\n\
5. Recommend high-impact, low-cost actions a small business can take.\n\
\n\
Be professional, empowering and solution-focused.",
        description.trim()
    )
}

/// Image parts in order, then exactly one instruction-text part. Output
/// shape is enforced only through the declared response schema.
pub fn build_request(
    parts: &[EncodedImagePart],
    description: &str,
    config: &AuditConfig,
) -> Result<AuditRequest, AuditError> {
    check_preconditions(parts.len(), description)?;

    let mut content_parts = parts.iter().map(EncodedImagePart::to_part).collect::<Vec<_>>();
    content_parts.push(json!({ "text": audit_prompt(description) }));

    let payload = json!({
        "contents": [{
            "role": "user",
            "parts": content_parts,
        }],
        "systemInstruction": {
            "parts": [{ "text": SYSTEM_INSTRUCTION }],
        },
        "generationConfig": {
            "responseMimeType": RESPONSE_MIME_TYPE,
            "responseSchema": audit_report_schema(),
            "temperature": config.temperature,
        },
    });

    Ok(AuditRequest {
        model: config.model.clone(),
        endpoint: config.endpoint(),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use ecoaudit_contracts::schema::audit_report_schema;
    use serde_json::{json, Value};

    use super::{audit_prompt, build_request, check_preconditions, SYSTEM_INSTRUCTION};
    use crate::config::AuditConfig;
    use crate::encoder::EncodedImagePart;
    use crate::error::{AuditError, VALIDATION_MESSAGE};

    fn part(data: &str, mime_type: &str) -> EncodedImagePart {
        EncodedImagePart {
            data: data.to_string(),
            mime_type: mime_type.to_string(),
            sha256: String::new(),
            byte_len: 0,
        }
    }

    #[test]
    fn image_parts_keep_order_then_one_text_part() -> anyhow::Result<()> {
        let parts = vec![
            part("AAA", "image/png"),
            part("BBB", "image/jpeg"),
            part("CCC", "image/webp"),
        ];
        let request = build_request(&parts, "Bakery with two ovens", &AuditConfig::new(None))?;
        let sent = request.parts();
        assert_eq!(sent.len(), 4);
        for (idx, expected) in ["AAA", "BBB", "CCC"].iter().enumerate() {
            assert_eq!(sent[idx]["inlineData"]["data"], json!(expected));
            assert!(sent[idx].get("text").is_none());
        }
        let text = sent[3]["text"].as_str().unwrap_or_default();
        assert!(text.contains("\"Bakery with two ovens\""));
        assert_eq!(
            sent.iter().filter(|part| part.get("text").is_some()).count(),
            1
        );
        Ok(())
    }

    #[test]
    fn generation_config_declares_schema_and_temperature() -> anyhow::Result<()> {
        let config = AuditConfig::new(Some("k".to_string())).with_model("gemini-2.5-pro");
        let request = build_request(&[part("AAA", "image/png")], "Print shop", &config)?;
        let generation = &request.payload["generationConfig"];
        assert_eq!(generation["responseMimeType"], json!("application/json"));
        assert_eq!(generation["temperature"], json!(0.4));
        assert_eq!(generation["responseSchema"], audit_report_schema());
        assert_eq!(
            request.payload["systemInstruction"]["parts"][0]["text"],
            Value::from(SYSTEM_INSTRUCTION)
        );
        assert_eq!(request.model, "gemini-2.5-pro");
        assert!(request.endpoint.ends_with("/models/gemini-2.5-pro:generateContent"));
        assert!(request.payload.get("key").is_none());
        Ok(())
    }

    #[test]
    fn refuses_without_images_or_description() {
        let config = AuditConfig::new(None);
        for (parts, description) in [
            (vec![], "Florist"),
            (vec![part("AAA", "image/png")], ""),
            (vec![part("AAA", "image/png")], " \n\t "),
        ] {
            match build_request(&parts, description, &config) {
                Err(AuditError::Validation(message)) => assert_eq!(message, VALIDATION_MESSAGE),
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn refuses_more_than_three_images() {
        assert!(check_preconditions(3, "ok").is_ok());
        assert!(matches!(
            check_preconditions(4, "ok"),
            Err(AuditError::Validation(_))
        ));
    }

    #[test]
    fn prompt_trims_description() {
        let prompt = audit_prompt("  Coffee roastery \n");
        assert!(prompt.contains("\"Coffee roastery\""));
        assert!(prompt.contains("EcoScore from 0 to 100"));
    }
}
