use db::models::agent_execution::AgentRole;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{
    Agent, AgentError,
    brief::{CompanyBrief, RefinementFeedback, impl_agent_input},
    design::{BrandSystem, SiteArchitecture},
    discovery::BusinessAnalysis,
};

pub const MAX_HEADLINE_CHARS: usize = 90;
pub const TITLE_CHARS: std::ops::RangeInclusive<usize> = 10..=60;
pub const META_DESCRIPTION_CHARS: std::ops::RangeInclusive<usize> = 50..=160;
pub const MAX_SECONDARY_KEYWORDS: usize = 5;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContentInput {
    pub profile: CompanyBrief,
    pub business_analysis: Option<BusinessAnalysis>,
    pub site_architecture: Option<SiteArchitecture>,
    pub brand: Option<BrandSystem>,
    pub feedback: Option<RefinementFeedback>,
}

impl_agent_input!(ContentInput);

impl ContentInput {
    fn routes_section(&self) -> String {
        match &self.site_architecture {
            Some(architecture) => architecture
                .routes
                .iter()
                .map(|r| format!("- {} ({}): {}", r.path, r.title, r.sections.join(", ")))
                .collect::<Vec<_>>()
                .join("\n"),
            None => "- / (Home)\n- /contact (Contact)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageCopy {
    pub path: String,
    pub headline: String,
    #[serde(default)]
    pub subheadline: Option<String>,
    pub body: Vec<String>,
    pub call_to_action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SiteCopy {
    pub pages: Vec<PageCopy>,
}

pub struct CopywriterAgent;

impl Agent for CopywriterAgent {
    type Input = ContentInput;
    type Output = SiteCopy;

    const ROLE: AgentRole = AgentRole::Copywriter;
    const NAME: &'static str = "Copywriter";

    fn instructions(&self) -> &'static str {
        "Write the copy for every page: a headline, an optional subheadline, body paragraphs and a call to action. Write in the brand voice and mention the services by name."
    }

    fn task(&self, input: &Self::Input) -> String {
        let mut task = format!("Write copy for these pages:\n{}", input.routes_section());
        if let Some(brand) = &input.brand {
            task.push_str(&format!("\nBrand voice: {}", brand.voice));
        }
        if let Some(analysis) = &input.business_analysis {
            task.push_str(&format!("\nPositioning: {}", analysis.positioning));
        }
        task
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
        if output.pages.is_empty() {
            return Err(AgentError::BusinessRule("copy covers no pages".to_string()));
        }
        for page in &output.pages {
            let length = page.headline.chars().count();
            if length == 0 || length > MAX_HEADLINE_CHARS {
                return Err(AgentError::BusinessRule(format!(
                    "headline for {} must be 1-{} characters, got {}",
                    page.path, MAX_HEADLINE_CHARS, length
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PageSeo {
    pub path: String,
    pub title: String,
    pub meta_description: String,
    pub primary_keyword: String,
    #[serde(default)]
    pub secondary_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeoStrategy {
    pub pages: Vec<PageSeo>,
}

pub struct SeoStrategistAgent;

impl Agent for SeoStrategistAgent {
    type Input = ContentInput;
    type Output = SeoStrategy;

    const ROLE: AgentRole = AgentRole::SeoStrategist;
    const NAME: &'static str = "SEO Strategist";

    fn instructions(&self) -> &'static str {
        "Plan on-page SEO for every page: a title tag, a meta description, one primary keyword and a few secondary keywords. Favour local search intent when a location is known."
    }

    fn task(&self, input: &Self::Input) -> String {
        format!(
            "Title tags must be {}-{} characters and meta descriptions {}-{} characters, with at most {} secondary keywords.\nPages:\n{}",
            TITLE_CHARS.start(),
            TITLE_CHARS.end(),
            META_DESCRIPTION_CHARS.start(),
            META_DESCRIPTION_CHARS.end(),
            MAX_SECONDARY_KEYWORDS,
            input.routes_section()
        )
    }

    fn validate_output(&self, output: &Self::Output) -> Result<(), AgentError> {
        if output.pages.is_empty() {
            return Err(AgentError::BusinessRule("strategy covers no pages".to_string()));
        }
        for page in &output.pages {
            let title = page.title.chars().count();
            if !TITLE_CHARS.contains(&title) {
                return Err(AgentError::BusinessRule(format!(
                    "title for {} has {} characters",
                    page.path, title
                )));
            }
            let meta = page.meta_description.chars().count();
            if !META_DESCRIPTION_CHARS.contains(&meta) {
                return Err(AgentError::BusinessRule(format!(
                    "meta description for {} has {} characters",
                    page.path, meta
                )));
            }
            if page.secondary_keywords.len() > MAX_SECONDARY_KEYWORDS {
                return Err(AgentError::BusinessRule(format!(
                    "{} has {} secondary keywords",
                    page.path,
                    page.secondary_keywords.len()
                )));
            }
        }
        Ok(())
    }
}
