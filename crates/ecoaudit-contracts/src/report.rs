use serde::{Deserialize, Serialize};

pub const ECO_SCORE_MIN: f64 = 0.0;
pub const ECO_SCORE_MAX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImpactLevel {
    High,
    Medium,
    Low,
}

impl ImpactLevel {
    pub const ALL: [ImpactLevel; 3] = [ImpactLevel::High, ImpactLevel::Medium, ImpactLevel::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            ImpactLevel::High => "High",
            ImpactLevel::Medium => "Medium",
            ImpactLevel::Low => "Low",
        }
    }

    /// Exact, case-sensitive match against the schema enum.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub issue: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionableStep {
    pub title: String,
    pub description: String,
    pub impact_level: ImpactLevel,
}

/// Result of one sustainability audit.
///
/// Only produced by [`RawAuditReport::validate`], so every instance has a
/// score within 0-100 and impact levels drawn from the schema enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub eco_score: u8,
    pub score_label: String,
    pub summary: String,
    pub key_observations: Vec<Observation>,
    pub impact_context: String,
    pub actionable_steps: Vec<ActionableStep>,
}

impl AuditReport {
    pub fn high_impact_steps(&self) -> impl Iterator<Item = &ActionableStep> {
        self.actionable_steps
            .iter()
            .filter(|step| step.impact_level == ImpactLevel::High)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActionableStep {
    pub title: String,
    pub description: String,
    pub impact_level: String,
}

/// The model output exactly as structural parsing sees it: the score is any
/// JSON number and impact levels are free strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAuditReport {
    pub eco_score: f64,
    pub score_label: String,
    pub summary: String,
    pub key_observations: Vec<Observation>,
    pub impact_context: String,
    pub actionable_steps: Vec<RawActionableStep>,
}

impl RawAuditReport {
    /// Checks the value constraints the schema declares but structural
    /// parsing cannot enforce. Returns every violation, not just the first.
    pub fn validate(self) -> Result<AuditReport, Vec<String>> {
        let mut violations = Vec::new();

        let eco_score = if !self.eco_score.is_finite() {
            violations.push(format!("ecoScore: {} is not a finite number", self.eco_score));
            None
        } else if !(ECO_SCORE_MIN..=ECO_SCORE_MAX).contains(&self.eco_score) {
            violations.push(format!(
                "ecoScore: {} is outside {ECO_SCORE_MIN}-{ECO_SCORE_MAX}",
                self.eco_score
            ));
            None
        } else {
            Some(self.eco_score.round() as u8)
        };

        let mut actionable_steps = Vec::with_capacity(self.actionable_steps.len());
        for (idx, step) in self.actionable_steps.into_iter().enumerate() {
            match ImpactLevel::parse(&step.impact_level) {
                Some(impact_level) => actionable_steps.push(ActionableStep {
                    title: step.title,
                    description: step.description,
                    impact_level,
                }),
                None => violations.push(format!(
                    "actionableSteps[{idx}].impactLevel: '{}' is not one of High, Medium, Low",
                    step.impact_level
                )),
            }
        }

        match eco_score {
            Some(eco_score) if violations.is_empty() => Ok(AuditReport {
                eco_score,
                score_label: self.score_label,
                summary: self.summary,
                key_observations: self.key_observations,
                impact_context: self.impact_context,
                actionable_steps,
            }),
            _ => Err(violations),
        }
    }
}
