use serde_json::{json, Value};

use crate::report::ImpactLevel;

pub const RESPONSE_MIME_TYPE: &str = "application/json";

/// Top-level report fields, all required.
pub const REQUIRED_REPORT_FIELDS: &[&str] = &[
    "ecoScore",
    "scoreLabel",
    "summary",
    "keyObservations",
    "impactContext",
    "actionableSteps",
];

/// Output schema in the generative-language REST dialect (upper-case type
/// names). This is the only shape hint the model receives.
pub fn audit_report_schema() -> Value {
    let impact_levels = ImpactLevel::ALL
        .iter()
        .map(|level| Value::String(level.as_str().to_string()))
        .collect::<Vec<Value>>();

    json!({
        "type": "OBJECT",
        "properties": {
            "ecoScore": {
                "type": "NUMBER",
                "description": "Sustainability score from 0 to 100 based on the photos and the description.",
            },
            "scoreLabel": {
                "type": "STRING",
                "description": "Short label for the score, e.g. 'Getting Started', 'Needs Improvement', 'Eco-Conscious'.",
            },
            "summary": {
                "type": "STRING",
                "description": "Two-sentence executive summary of the findings.",
            },
            "keyObservations": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "issue": {
                            "type": "STRING",
                            "description": "Core issue observed, e.g. 'Single-use Plastics'.",
                        },
                        "detail": {
                            "type": "STRING",
                            "description": "Detail grounded in a photo, e.g. 'Styrofoam containers visible in prep area'.",
                        },
                    },
                    "required": ["issue", "detail"],
                },
            },
            "impactContext": {
                "type": "STRING",
                "description": "Data-informed statement about the environmental consequence, e.g. 'contributes ~X kg of landfill annually'.",
            },
            "actionableSteps": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "title": {"type": "STRING", "description": "Action title."},
                        "description": {"type": "STRING", "description": "Specific, practical advice."},
                        "impactLevel": {"type": "STRING", "enum": impact_levels},
                    },
                    "required": ["title", "description", "impactLevel"],
                },
            },
        },
        "required": REQUIRED_REPORT_FIELDS,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{audit_report_schema, REQUIRED_REPORT_FIELDS};

    #[test]
    fn every_report_field_is_required_and_declared() {
        let schema = audit_report_schema();
        let properties = schema["properties"].as_object().cloned().unwrap_or_default();
        assert_eq!(properties.len(), REQUIRED_REPORT_FIELDS.len());
        for field in REQUIRED_REPORT_FIELDS {
            assert!(properties.contains_key(*field), "missing {field}");
        }
        assert_eq!(
            schema["required"].as_array().map(Vec::len),
            Some(REQUIRED_REPORT_FIELDS.len())
        );
    }

    #[test]
    fn impact_level_enum_matches_report_type() {
        let schema = audit_report_schema();
        assert_eq!(
            schema["properties"]["actionableSteps"]["items"]["properties"]["impactLevel"]["enum"],
            json!(["High", "Medium", "Low"])
        );
        assert_eq!(
            schema["properties"]["keyObservations"]["items"]["required"],
            json!(["issue", "detail"])
        );
        assert_eq!(schema["properties"]["ecoScore"]["type"], Value::from("NUMBER"));
    }
}
