use std::collections::HashSet;

use db::models::agent_execution::AgentRole;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{
    Agent, AgentError,
    brief::{CompanyBrief, RefinementFeedback, impl_agent_input},
    discovery::{BusinessAnalysis, CompetitorResearch},
    planner::SitePlan,
};

/// Fewest routes a site architecture may have.
pub const MIN_ROUTES: usize = 3;
const REQUIRED_ROUTES: [&str; 2] = ["/", "/contact"];

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DesignInput {
    pub profile: CompanyBrief,
    pub plan: Option<SitePlan>,
    pub business_analysis: Option<BusinessAnalysis>,
    pub competitor_research: Option<CompetitorResearch>,
    /// Previous architecture, present on refinement iterations.
    pub site_architecture: Option<SiteArchitecture>,
    pub feedback: Option<RefinementFeedback>,
}

impl_agent_input!(DesignInput);

impl DesignInput {
    fn discovery_section(&self) -> String {
        let mut lines = Vec::new();
        if let Some(plan) = &self.plan {
            let pages: Vec<&str> = plan.pages.iter().map(|p| p.slug.as_str()).collect();
            lines.push(format!("Planned pages: {}", pages.join(", ")));
        }
        if let Some(analysis) = &self.business_analysis {
            lines.push(format!("Positioning: {}", analysis.positioning));
            lines.push(format!(
                "Value propositions: {}",
                analysis.value_propositions.join("; ")
            ));
        }
        if let Some(research) = &self.competitor_research {
            lines.push(format!(
                "Differentiators: {}",
                research.differentiators.join("; ")
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SiteArchitecture {
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub navigation: Vec<String>,
}

pub struct SiteArchitectAgent;

impl Agent for SiteArchitectAgent {
    type Input = DesignInput;
    type Output = SiteArchitecture;

    const ROLE: AgentRole = AgentRole::SiteArchitect;
    const NAME: &'static str = "Site Architect";

    fn instructions(&self) -> &'static str {
        "Design the information architecture: the routes of the site, the sections each page contains and the main navigation. Every site needs a home page at \"/\" and a contact page at \"/contact\"."
    }

    fn task(&self, input: &Self::Input) -> String {
        let mut task = format!(
            "Design the site structure with at least {} routes.\n{}",
            MIN_ROUTES,
            input.discovery_section()
        );
        if let Some(previous) = &input.site_architecture {
            let routes: Vec<&str> = previous.routes.iter().map(|r| r.path.as_str()).collect();
            task.push_str(&format!("\nPrevious routes: {}", routes.join(", ")));
        }
        task
    }

    fn validate_output(&self, output: &Self::Output) -> Result<(), AgentError> {
        if output.routes.len() < MIN_ROUTES {
            return Err(AgentError::BusinessRule(format!(
                "site needs at least {} routes, got {}",
                MIN_ROUTES,
                output.routes.len()
            )));
        }

        let mut seen = HashSet::new();
        for route in &output.routes {
            if !route.path.starts_with('/') {
                return Err(AgentError::BusinessRule(format!(
                    "route {} must start with /",
                    route.path
                )));
            }
            if !seen.insert(route.path.as_str()) {
                return Err(AgentError::BusinessRule(format!(
                    "duplicate route {}",
                    route.path
                )));
            }
        }

        for required in REQUIRED_ROUTES {
            if !seen.contains(required) {
                return Err(AgentError::BusinessRule(format!(
                    "missing required route {}",
                    required
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Palette {
    pub primary: String,
    pub secondary: String,
    pub accent: String,
    pub background: String,
    pub text: String,
}

impl Palette {
    fn colors(&self) -> [(&'static str, &str); 5] {
        [
            ("primary", self.primary.as_str()),
            ("secondary", self.secondary.as_str()),
            ("accent", self.accent.as_str()),
            ("background", self.background.as_str()),
            ("text", self.text.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Typography {
    pub heading: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrandSystem {
    pub palette: Palette,
    pub typography: Typography,
    pub voice: String,
}

pub fn is_hex_color(value: &str) -> bool {
    let Some(hex) = value.strip_prefix('#') else {
        return false;
    };
    matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

pub struct BrandDesignerAgent;

impl Agent for BrandDesignerAgent {
    type Input = DesignInput;
    type Output = BrandSystem;

    const ROLE: AgentRole = AgentRole::BrandDesigner;
    const NAME: &'static str = "Brand Designer";

    fn instructions(&self) -> &'static str {
        "Define the visual identity: a colour palette given as hex codes, a heading and body font pairing and a one-sentence brand voice."
    }

    fn task(&self, input: &Self::Input) -> String {
        format!("Create the brand system.\n{}", input.discovery_section())
    }

    fn validate_output(&self, output: &Self::Output) -> Result<(), AgentError> {
        for (name, color) in output.palette.colors() {
            if !is_hex_color(color) {
                return Err(AgentError::BusinessRule(format!(
                    "palette {} colour {} is not a hex code",
                    name, color
                )));
            }
        }
        Ok(())
    }
}
