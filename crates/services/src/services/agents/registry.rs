use db::models::agent_execution::{AgentRole, Layer};
use serde::Serialize;
use serde_json::Value;
use ts_rs::TS;

use super::{
    AgentRunner,
    code::PageGeneratorAgent,
    content::{CopywriterAgent, SeoStrategistAgent},
    design::{BrandDesignerAgent, SiteArchitectAgent},
    discovery::{BusinessAnalystAgent, CompetitorResearcherAgent},
    planner::ProjectPlannerAgent,
    quality::{AccessibilityAuditorAgent, SeoAuditorAgent},
};

/// Schemas of one registered agent, as served to clients.
#[derive(Debug, Clone, Serialize, TS)]
pub struct AgentDescriptor {
    pub role: AgentRole,
    pub name: String,
    pub layer: Layer,
    #[ts(type = "Record<string, unknown>")]
    pub input_schema: Value,
    #[ts(type = "Record<string, unknown>")]
    pub output_schema: Value,
}

/// Fixed mapping from role to agent implementation. Adding a role without
/// an agent does not compile.
pub struct AgentRegistry;

impl AgentRegistry {
    pub fn runner(role: AgentRole) -> &'static dyn AgentRunner {
        match role {
            AgentRole::ProjectPlanner => &ProjectPlannerAgent,
            AgentRole::BusinessAnalyst => &BusinessAnalystAgent,
            AgentRole::CompetitorResearcher => &CompetitorResearcherAgent,
            AgentRole::SiteArchitect => &SiteArchitectAgent,
            AgentRole::BrandDesigner => &BrandDesignerAgent,
            AgentRole::Copywriter => &CopywriterAgent,
            AgentRole::SeoStrategist => &SeoStrategistAgent,
            AgentRole::PageGenerator => &PageGeneratorAgent,
            AgentRole::SeoAuditor => &SeoAuditorAgent,
            AgentRole::AccessibilityAuditor => &AccessibilityAuditorAgent,
        }
    }

    pub fn layer(role: AgentRole) -> Layer {
        match role {
            AgentRole::ProjectPlanner => Layer::Orchestrator,
            AgentRole::BusinessAnalyst | AgentRole::CompetitorResearcher => Layer::Discovery,
            AgentRole::SiteArchitect | AgentRole::BrandDesigner => Layer::Design,
            AgentRole::Copywriter | AgentRole::SeoStrategist => Layer::Content,
            AgentRole::PageGenerator => Layer::Code,
            AgentRole::SeoAuditor | AgentRole::AccessibilityAuditor => Layer::Quality,
        }
    }

    pub fn describe(role: AgentRole) -> AgentDescriptor {
        let runner = Self::runner(role);
        AgentDescriptor {
            role,
            name: runner.name().to_string(),
            layer: Self::layer(role),
            input_schema: runner.input_schema(),
            output_schema: runner.output_schema(),
        }
    }

    pub fn describe_all() -> Vec<AgentDescriptor> {
        AgentRole::ALL.iter().map(|role| Self::describe(*role)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_resolves_to_its_own_agent() {
        for role in AgentRole::ALL {
            assert_eq!(AgentRegistry::runner(role).role(), role);
        }
        assert_eq!(AgentRegistry::layer(AgentRole::PageGenerator), Layer::Code);
    }

    #[test]
    fn descriptors_expose_schemas() {
        let descriptor = AgentRegistry::describe(AgentRole::SiteArchitect);
        let schema = descriptor.output_schema.to_string();
        assert!(schema.contains("routes"));
        assert_eq!(AgentRegistry::describe_all().len(), AgentRole::ALL.len());
    }
}
