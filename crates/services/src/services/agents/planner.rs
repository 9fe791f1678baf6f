use db::models::agent_execution::AgentRole;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{
    Agent, AgentError,
    brief::{CompanyBrief, RefinementFeedback, impl_agent_input},
};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlannerInput {
    pub profile: CompanyBrief,
    pub feedback: Option<RefinementFeedback>,
}

impl_agent_input!(PlannerInput);

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlannedPage {
    pub slug: String,
    pub title: String,
    pub purpose: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SitePlan {
    pub summary: String,
    pub primary_goal: String,
    pub pages: Vec<PlannedPage>,
    #[serde(default)]
    pub calls_to_action: Vec<String>,
}

pub struct ProjectPlannerAgent;

impl Agent for ProjectPlannerAgent {
    type Input = PlannerInput;
    type Output = SitePlan;

    const ROLE: AgentRole = AgentRole::ProjectPlanner;
    const NAME: &'static str = "Project Planner";

    fn instructions(&self) -> &'static str {
        "Turn the business brief into a website plan: the single most important goal, the pages the site needs and the calls to action that serve the goal."
    }

    fn task(&self, _input: &Self::Input) -> String {
        "Plan the website.".to_string()
    }

    fn validate_output(&self, output: &Self::Output) -> Result<(), AgentError> {
        if output.pages.is_empty() {
            return Err(AgentError::BusinessRule("plan contains no pages".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::services::{
        agents::{
            AgentRunner,
            test_support::{context, fenced, profile},
        },
        llm::{ScriptedProvider, ScriptedReply},
    };

    #[tokio::test]
    async fn planner_rejects_empty_plan() {
        let provider = ScriptedProvider::new();
        provider.push(
            "PROJECT_PLANNER",
            ScriptedReply::Text(fenced(&json!({
                "summary": "s", "primaryGoal": "g", "pages": [], "callsToAction": []
            }))),
        );

        let err = ProjectPlannerAgent
            .run(&json!({"profile": profile()}), &context(), &provider, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::BusinessRule(_)));
    }

    #[tokio::test]
    async fn planner_prompt_carries_schema_and_guidance() {
        let provider = ScriptedProvider::new();
        provider.push(
            "PROJECT_PLANNER",
            ScriptedReply::Text(fenced(&json!({
                "summary": "s",
                "primaryGoal": "g",
                "pages": [{"slug": "/", "title": "Home", "purpose": "Welcome"}]
            }))),
        );

        let result = ProjectPlannerAgent
            .run(&json!({"profile": profile()}), &context(), &provider, false)
            .await
            .unwrap();
        assert_eq!(result.output["pages"][0]["title"], "Home");
        assert!(result.evaluation.is_none());

        let call = &provider.calls()[0];
        assert!(call.system_prompt.contains("primaryGoal"));
        assert!(call.system_prompt.contains("menu"));
        assert!(call.user_prompt.contains("Harbor Bakery"));
    }
}
