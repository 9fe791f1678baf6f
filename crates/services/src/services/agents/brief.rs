use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Business facts as every agent receives them.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompanyBrief {
    pub business_name: String,
    pub industry: String,
    pub description: String,
    #[serde(default)]
    pub services: Vec<String>,
    pub location: Option<String>,
    pub target_audience: Option<String>,
    pub tone: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
}

impl CompanyBrief {
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Business: {}", self.business_name),
            format!("Industry: {}", self.industry),
            format!("Description: {}", self.description),
        ];
        if !self.services.is_empty() {
            lines.push(format!("Services: {}", self.services.join(", ")));
        }
        if let Some(location) = &self.location {
            lines.push(format!("Location: {}", location));
        }
        if let Some(audience) = &self.target_audience {
            lines.push(format!("Target audience: {}", audience));
        }
        if let Some(tone) = &self.tone {
            lines.push(format!("Tone: {}", tone));
        }
        if !self.goals.is_empty() {
            lines.push(format!("Goals: {}", self.goals.join("; ")));
        }
        lines.join("\n")
    }
}

/// Quality results from the previous iteration, handed to every agent of a
/// refinement iteration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefinementFeedback {
    pub composite_score: f64,
    pub pass_score: f64,
    pub failing_metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl RefinementFeedback {
    pub fn prompt_section(&self) -> String {
        let mut section = format!(
            "The previous version scored {:.2} against a pass mark of {:.2}.",
            self.composite_score, self.pass_score
        );
        if !self.failing_metrics.is_empty() {
            section.push_str("\nMetrics below the pass mark:");
            for (metric, score) in &self.failing_metrics {
                section.push_str(&format!("\n- {}: {:.2}", metric, score));
            }
        }
        if !self.issues.is_empty() {
            section.push_str("\nReported issues:");
            for issue in &self.issues {
                section.push_str(&format!("\n- {}", issue));
            }
        }
        section.push_str("\nFix these problems in this revision.");
        section
    }
}

/// Shared view of every agent input.
pub trait AgentInput {
    fn profile(&self) -> &CompanyBrief;
    fn feedback(&self) -> Option<&RefinementFeedback>;
}

macro_rules! impl_agent_input {
    ($($input:ty),+ $(,)?) => {
        $(
            impl $crate::services::agents::brief::AgentInput for $input {
                fn profile(&self) -> &$crate::services::agents::brief::CompanyBrief {
                    &self.profile
                }

                fn feedback(&self) -> Option<&$crate::services::agents::brief::RefinementFeedback> {
                    self.feedback.as_ref()
                }
            }
        )+
    };
}

pub(crate) use impl_agent_input;
