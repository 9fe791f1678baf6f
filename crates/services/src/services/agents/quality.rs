use std::collections::BTreeMap;

use db::models::agent_execution::AgentRole;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{
    Agent, AgentError,
    brief::{CompanyBrief, RefinementFeedback, impl_agent_input},
    code::GeneratedSite,
    content::SeoStrategy,
};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualityInput {
    pub profile: CompanyBrief,
    pub pages: Option<GeneratedSite>,
    pub seo_strategy: Option<SeoStrategy>,
    pub feedback: Option<RefinementFeedback>,
}

impl_agent_input!(QualityInput);

impl QualityInput {
    fn files_section(&self) -> String {
        match &self.pages {
            Some(site) => site
                .files
                .iter()
                .map(|f| format!("--- {} ---\n{}", f.path, f.content))
                .collect::<Vec<_>>()
                .join("\n\n"),
            None => "(no files generated)".to_string(),
        }
    }
}

/// Scores per metric in `[0, 1]` plus what to fix.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

fn validate_report(report: &QualityReport) -> Result<(), AgentError> {
    if report.scores.is_empty() {
        return Err(AgentError::BusinessRule("report has no scores".to_string()));
    }
    for (metric, score) in &report.scores {
        if !score.is_finite() || !(0.0..=1.0).contains(score) {
            return Err(AgentError::BusinessRule(format!(
                "score {} for {} is outside [0, 1]",
                score, metric
            )));
        }
    }
    Ok(())
}

fn report_evaluation(report: &QualityReport) -> Option<Value> {
    Some(json!({
        "scores": report.scores,
        "issues": report.issues,
    }))
}

pub struct SeoAuditorAgent;

impl Agent for SeoAuditorAgent {
    type Input = QualityInput;
    type Output = QualityReport;

    const ROLE: AgentRole = AgentRole::SeoAuditor;
    const NAME: &'static str = "SEO Auditor";

    fn instructions(&self) -> &'static str {
        "Audit the generated site for search engine optimisation. Score each metric from 0 to 1: titles, metaDescriptions, headings, keywordUsage and internalLinking. List concrete issues."
    }

    fn task(&self, input: &Self::Input) -> String {
        let mut task = format!("Audit these files:\n{}", input.files_section());
        if let Some(strategy) = &input.seo_strategy {
            task.push_str(&format!(
                "\n\nIntended SEO strategy:\n{}",
                serde_json::to_string_pretty(strategy).unwrap_or_default()
            ));
        }
        task
    }

    fn validate_output(&self, output: &Self::Output) -> Result<(), AgentError> {
        validate_report(output)
    }

    fn evaluation(&self, output: &Self::Output) -> Option<Value> {
        report_evaluation(output)
    }
}

pub struct AccessibilityAuditorAgent;

impl Agent for AccessibilityAuditorAgent {
    type Input = QualityInput;
    type Output = QualityReport;

    const ROLE: AgentRole = AgentRole::AccessibilityAuditor;
    const NAME: &'static str = "Accessibility Auditor";

    fn instructions(&self) -> &'static str {
        "Audit the generated site against WCAG 2.1 AA. Score each metric from 0 to 1: semantics, altText, contrast, keyboardNavigation and forms. List concrete issues."
    }

    fn task(&self, input: &Self::Input) -> String {
        format!("Audit these files:\n{}", input.files_section())
    }

    fn validate_output(&self, output: &Self::Output) -> Result<(), AgentError> {
        validate_report(output)
    }

    fn evaluation(&self, output: &Self::Output) -> Option<Value> {
        report_evaluation(output)
    }
}
