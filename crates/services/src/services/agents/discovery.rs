use db::models::agent_execution::AgentRole;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{
    Agent, AgentError,
    brief::{CompanyBrief, RefinementFeedback, impl_agent_input},
    planner::SitePlan,
};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryInput {
    pub profile: CompanyBrief,
    pub plan: Option<SitePlan>,
    pub feedback: Option<RefinementFeedback>,
}

impl_agent_input!(DiscoveryInput);

fn plan_section(plan: Option<&SitePlan>) -> String {
    match plan {
        Some(plan) => format!(
            "Site plan: {} Primary goal: {}.",
            plan.summary, plan.primary_goal
        ),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AudienceSegment {
    pub name: String,
    #[serde(default)]
    pub needs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BusinessAnalysis {
    pub positioning: String,
    pub value_propositions: Vec<String>,
    #[serde(default)]
    pub audiences: Vec<AudienceSegment>,
    #[serde(default)]
    pub key_services: Vec<String>,
}

pub struct BusinessAnalystAgent;

impl Agent for BusinessAnalystAgent {
    type Input = DiscoveryInput;
    type Output = BusinessAnalysis;

    const ROLE: AgentRole = AgentRole::BusinessAnalyst;
    const NAME: &'static str = "Business Analyst";

    fn instructions(&self) -> &'static str {
        "Analyse the business: how it should position itself, its value propositions, the audience segments it serves and which services to feature."
    }

    fn task(&self, input: &Self::Input) -> String {
        format!(
            "Analyse this business. {}",
            plan_section(input.plan.as_ref())
        )
    }

    fn check_preconditions(&self, input: &Self::Input) -> Result<(), AgentError> {
        if input.profile.services.iter().all(|s| s.trim().is_empty()) {
            return Err(AgentError::Validation(
                "at least one service must be defined".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_output(&self, output: &Self::Output) -> Result<(), AgentError> {
        if output.value_propositions.is_empty() {
            return Err(AgentError::BusinessRule(
                "analysis names no value propositions".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Competitor {
    pub name: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompetitorResearch {
    #[serde(default)]
    pub competitors: Vec<Competitor>,
    pub differentiators: Vec<String>,
}

pub struct CompetitorResearcherAgent;

impl Agent for CompetitorResearcherAgent {
    type Input = DiscoveryInput;
    type Output = CompetitorResearch;

    const ROLE: AgentRole = AgentRole::CompetitorResearcher;
    const NAME: &'static str = "Competitor Researcher";

    fn instructions(&self) -> &'static str {
        "Describe the typical local competitors for this kind of business and what sets this business apart from them."
    }

    fn task(&self, input: &Self::Input) -> String {
        format!(
            "Research the competition{}. {}",
            input
                .profile
                .location
                .as_deref()
                .map(|l| format!(" around {}", l))
                .unwrap_or_default(),
            plan_section(input.plan.as_ref())
        )
    }

    fn validate_output(&self, output: &Self::Output) -> Result<(), AgentError> {
        if output.differentiators.is_empty() {
            return Err(AgentError::BusinessRule(
                "research names no differentiators".to_string(),
            ));
        }
        Ok(())
    }
}
