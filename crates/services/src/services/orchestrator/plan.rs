use std::time::Duration;

use db::models::agent_execution::{AgentRole, Layer};
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;

use crate::services::{
    agents::AgentRegistry,
    config::{OrchestratorConfig, RefinementScope},
};

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("layer {0} appears more than once or out of order")]
    OutOfOrder(Layer),
    #[error("layer {0} has no agents")]
    EmptyLayer(Layer),
    #[error("agent {role} belongs to layer {expected}, not {found}")]
    WrongLayer {
        role: AgentRole,
        expected: Layer,
        found: Layer,
    },
    #[error("layer {layer} depends on {dependency}, which does not run before it")]
    UnknownDependency { layer: Layer, dependency: Layer },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Parallel,
    Sequential,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct PlannedAgent {
    pub role: AgentRole,
    /// A failed optional agent does not fail its layer.
    pub optional: bool,
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct LayerPlan {
    pub layer: Layer,
    pub mode: ExecutionMode,
    pub agents: Vec<PlannedAgent>,
    pub depends_on: Vec<Layer>,
    #[ts(type = "number")]
    #[serde(serialize_with = "serialize_secs")]
    pub timeout: Duration,
}

fn serialize_secs<S: serde::Serializer>(timeout: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(timeout.as_secs())
}

#[derive(Debug, Clone, Serialize, TS)]
pub struct WorkflowPlan {
    pub layers: Vec<LayerPlan>,
}

fn required(role: AgentRole) -> PlannedAgent {
    PlannedAgent {
        role,
        optional: false,
    }
}

impl WorkflowPlan {
    /// The website workflow: one planner, then discovery, design, content,
    /// code and quality.
    pub fn website(config: &OrchestratorConfig) -> Self {
        let standard = config.standard_timeout();
        let layer = |layer, mode, agents, depends_on: &[Layer], timeout| LayerPlan {
            layer,
            mode,
            agents,
            depends_on: depends_on.to_vec(),
            timeout,
        };

        Self {
            layers: vec![
                layer(
                    Layer::Orchestrator,
                    ExecutionMode::Sequential,
                    vec![required(AgentRole::ProjectPlanner)],
                    &[],
                    standard,
                ),
                layer(
                    Layer::Discovery,
                    ExecutionMode::Parallel,
                    vec![
                        required(AgentRole::BusinessAnalyst),
                        PlannedAgent {
                            role: AgentRole::CompetitorResearcher,
                            optional: true,
                        },
                    ],
                    &[Layer::Orchestrator],
                    standard,
                ),
                layer(
                    Layer::Design,
                    ExecutionMode::Parallel,
                    vec![
                        required(AgentRole::SiteArchitect),
                        required(AgentRole::BrandDesigner),
                    ],
                    &[Layer::Discovery],
                    standard,
                ),
                layer(
                    Layer::Content,
                    ExecutionMode::Parallel,
                    vec![
                        required(AgentRole::Copywriter),
                        required(AgentRole::SeoStrategist),
                    ],
                    &[Layer::Design],
                    standard,
                ),
                layer(
                    Layer::Code,
                    ExecutionMode::Sequential,
                    vec![required(AgentRole::PageGenerator)],
                    &[Layer::Design, Layer::Content],
                    config.code_timeout(),
                ),
                layer(
                    Layer::Quality,
                    ExecutionMode::Parallel,
                    vec![
                        required(AgentRole::SeoAuditor),
                        required(AgentRole::AccessibilityAuditor),
                    ],
                    &[Layer::Code],
                    standard,
                ),
            ],
        }
    }

    /// Layers must be unique, in pipeline order, non-empty and only hold
    /// agents of their own layer. Dependencies must run earlier.
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut previous: Option<Layer> = None;
        for plan in &self.layers {
            if previous.is_some_and(|p| p >= plan.layer) {
                return Err(PlanError::OutOfOrder(plan.layer));
            }
            if plan.agents.is_empty() {
                return Err(PlanError::EmptyLayer(plan.layer));
            }
            for agent in &plan.agents {
                let expected = AgentRegistry::layer(agent.role);
                if expected != plan.layer {
                    return Err(PlanError::WrongLayer {
                        role: agent.role,
                        expected,
                        found: plan.layer,
                    });
                }
            }
            for dependency in &plan.depends_on {
                let runs_before = self
                    .layers
                    .iter()
                    .any(|l| l.layer == *dependency && l.layer < plan.layer);
                if !runs_before {
                    return Err(PlanError::UnknownDependency {
                        layer: plan.layer,
                        dependency: *dependency,
                    });
                }
            }
            previous = Some(plan.layer);
        }
        Ok(())
    }

    pub fn layer(&self, layer: Layer) -> Option<&LayerPlan> {
        self.layers.iter().find(|l| l.layer == layer)
    }

    /// Layers re-run by a refinement iteration, QUALITY always last.
    pub fn refinement_layers(&self, scope: RefinementScope) -> Vec<Layer> {
        let mut layers = match scope {
            RefinementScope::Code => vec![Layer::Code],
            RefinementScope::DesignAndCode => vec![Layer::Design, Layer::Code],
        };
        layers.push(Layer::Quality);
        layers.retain(|layer| self.layer(*layer).is_some());
        layers
    }

    pub fn all_layers(&self) -> Vec<Layer> {
        self.layers.iter().map(|l| l.layer).collect()
    }

    /// Timeout of a layer, falling back to `default` for layers the plan
    /// does not contain.
    pub fn timeout_for(&self, layer: Layer, default: Duration) -> Duration {
        self.layer(layer).map(|l| l.timeout).unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn website_plan_is_valid() {
        let plan = WorkflowPlan::website(&OrchestratorConfig::default());
        assert_eq!(plan.validate(), Ok(()));
        assert_eq!(plan.all_layers(), Layer::ORDER.to_vec());
        assert_eq!(
            plan.layer(Layer::Code).unwrap().timeout,
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn rejects_out_of_order_and_misplaced_agents() {
        let mut plan = WorkflowPlan::website(&OrchestratorConfig::default());
        plan.layers.swap(1, 2);
        assert!(matches!(plan.validate(), Err(PlanError::OutOfOrder(_))));

        let mut plan = WorkflowPlan::website(&OrchestratorConfig::default());
        plan.layers[0].agents.push(required(AgentRole::PageGenerator));
        assert!(matches!(plan.validate(), Err(PlanError::WrongLayer { .. })));

        let mut plan = WorkflowPlan::website(&OrchestratorConfig::default());
        plan.layers[1].depends_on.push(Layer::Quality);
        assert!(matches!(
            plan.validate(),
            Err(PlanError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn refinement_scope_selects_layers() {
        let plan = WorkflowPlan::website(&OrchestratorConfig::default());
        assert_eq!(
            plan.refinement_layers(RefinementScope::Code),
            vec![Layer::Code, Layer::Quality]
        );
        assert_eq!(
            plan.refinement_layers(RefinementScope::DesignAndCode),
            vec![Layer::Design, Layer::Code, Layer::Quality]
        );
    }
}
