use std::collections::HashSet;

use db::models::agent_execution::AgentRole;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{
    Agent, AgentContext, AgentError, ArtifactDescriptor,
    brief::{CompanyBrief, RefinementFeedback, impl_agent_input},
    content::{SeoStrategy, SiteCopy},
    design::{BrandSystem, SiteArchitecture},
};

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CodeInput {
    pub profile: CompanyBrief,
    pub site_architecture: Option<SiteArchitecture>,
    pub brand: Option<BrandSystem>,
    pub copy: Option<SiteCopy>,
    pub seo_strategy: Option<SeoStrategy>,
    /// Files from the previous iteration, present on refinement runs.
    pub pages: Option<GeneratedSite>,
    pub feedback: Option<RefinementFeedback>,
}

impl_agent_input!(CodeInput);

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSite {
    pub files: Vec<GeneratedFile>,
}

fn json_section<T: Serialize>(label: &str, value: &Option<T>) -> String {
    match value {
        Some(value) => format!(
            "\n\n{}:\n{}",
            label,
            serde_json::to_string_pretty(value).unwrap_or_default()
        ),
        None => String::new(),
    }
}

pub struct PageGeneratorAgent;

impl Agent for PageGeneratorAgent {
    type Input = CodeInput;
    type Output = GeneratedSite;

    const ROLE: AgentRole = AgentRole::PageGenerator;
    const NAME: &'static str = "Page Generator";

    fn instructions(&self) -> &'static str {
        "Produce the website as static files: semantic, accessible HTML for every route plus one shared stylesheet. index.html is the home page. Use the brand palette and fonts, the supplied copy and the SEO titles and meta descriptions."
    }

    fn task(&self, input: &Self::Input) -> String {
        let mut task = "Generate the site files.".to_string();
        task.push_str(&json_section("Architecture", &input.site_architecture));
        task.push_str(&json_section("Brand", &input.brand));
        task.push_str(&json_section("Copy", &input.copy));
        task.push_str(&json_section("SEO", &input.seo_strategy));
        if input.feedback.is_some() {
            task.push_str(&json_section("Previous files", &input.pages));
        }
        task
    }

    fn max_tokens(&self) -> Option<u32> {
        Some(16_000)
    }

    fn validate_output(&self, output: &Self::Output) -> Result<(), AgentError> {
        if output.files.is_empty() {
            return Err(AgentError::BusinessRule("no files generated".to_string()));
        }
        let mut seen = HashSet::new();
        for file in &output.files {
            if file.path.is_empty()
                || file.path.starts_with('/')
                || file.path.split('/').any(|segment| segment == "..")
            {
                return Err(AgentError::BusinessRule(format!(
                    "invalid file path {}",
                    file.path
                )));
            }
            if !seen.insert(file.path.as_str()) {
                return Err(AgentError::BusinessRule(format!(
                    "duplicate file {}",
                    file.path
                )));
            }
        }
        if !seen.contains("index.html") {
            return Err(AgentError::BusinessRule("index.html is missing".to_string()));
        }
        Ok(())
    }

    fn store_artifacts(&self, output: &Self::Output, ctx: &AgentContext) -> Vec<ArtifactDescriptor> {
        output
            .files
            .iter()
            .map(|file| ArtifactDescriptor {
                path: format!("iteration-{}/{}", ctx.iteration, file.path),
                content: file.content.clone(),
            })
            .collect()
    }
}
