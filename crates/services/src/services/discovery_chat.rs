//! Discovery chat
//!
//! Conversational intake of a project's business facts. Each turn asks the
//! model to answer the user and to restate what it learned as JSON; those
//! facts are folded into the project's discovery state. Once the state
//! holds a complete brief, it becomes the project's company profile.

use std::sync::Arc;

use db::{
    DBService,
    models::{
        company_profile::{CompanyProfile, CompanyProfileError, UpsertCompanyProfile},
        project::{Project, ProjectError},
    },
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::services::{
    agents::{CompanyBrief, extraction::merge_extracted},
    llm::{CompletionRequest, LlmProvider, ProviderError, role_marker},
};

pub const DISCOVERY_CHAT_MARKER: &str = "DISCOVERY_CHAT";

#[derive(Debug, Error)]
pub enum DiscoveryChatError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Profile(#[from] CompanyProfileError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Project not found")]
    NotFound,
    #[error("Message must not be empty")]
    EmptyMessage,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryTurn {
    pub reply: String,
    #[ts(type = "Record<string, unknown>")]
    pub state: Value,
    pub profile_complete: bool,
    pub extraction_warning: Option<String>,
}

fn system_prompt(state: &Value) -> String {
    format!(
        "{}You interview a small-business owner to collect what is needed to build their website: businessName, industry, description, services (list), location, targetAudience, tone and goals (list).\n\nAnswer conversationally and ask for whatever is still missing, one or two questions at a time. After your answer, add a single ```json fenced block holding only the facts you learned in this turn, using the field names above.\n\nKnown so far:\n{}",
        role_marker(DISCOVERY_CHAT_MARKER),
        serde_json::to_string_pretty(state).unwrap_or_default()
    )
}

/// The conversational part of a reply, without the JSON block.
fn conversational_part(text: &str) -> String {
    text.split("```").next().unwrap_or_default().trim().to_string()
}

/// A brief counts as complete once the facts every agent relies on exist.
fn complete_brief(state: &Value) -> Option<CompanyBrief> {
    let brief: CompanyBrief = serde_json::from_value(state.clone()).ok()?;
    let filled = |s: &str| !s.trim().is_empty();
    (filled(&brief.business_name)
        && filled(&brief.industry)
        && filled(&brief.description)
        && brief.services.iter().any(|s| filled(s)))
    .then_some(brief)
}

#[derive(Clone)]
pub struct DiscoveryChat {
    db: DBService,
    provider: Arc<dyn LlmProvider>,
}

impl DiscoveryChat {
    pub fn new(db: DBService, provider: Arc<dyn LlmProvider>) -> Self {
        Self { db, provider }
    }

    pub async fn respond(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        message: &str,
    ) -> Result<DiscoveryTurn, DiscoveryChatError> {
        if message.trim().is_empty() {
            return Err(DiscoveryChatError::EmptyMessage);
        }
        let pool = &self.db.pool;
        let project = Project::find_by_id(pool, tenant_id, project_id)
            .await?
            .ok_or(DiscoveryChatError::NotFound)?;
        let prior = project.discovery_state.unwrap_or_else(|| json!({}));

        let content = self
            .provider
            .complete(CompletionRequest::new(system_prompt(&prior), message))
            .await?;
        let text = content.joined_text();

        let merged = merge_extracted(&prior, &text);
        if let Some(warning) = &merged.warning {
            tracing::warn!(
                "[DISCOVERY] Reply for project {} had no usable facts: {}",
                project_id,
                warning
            );
        }
        Project::update_discovery_state(pool, tenant_id, project_id, &merged.state).await?;

        let brief = complete_brief(&merged.state);
        if let Some(brief) = &brief {
            CompanyProfile::upsert(
                pool,
                tenant_id,
                project_id,
                &UpsertCompanyProfile {
                    business_name: brief.business_name.clone(),
                    industry: brief.industry.clone(),
                    description: brief.description.clone(),
                    services: brief.services.clone(),
                    location: brief.location.clone(),
                    target_audience: brief.target_audience.clone(),
                    tone: brief.tone.clone(),
                    goals: brief.goals.clone(),
                },
            )
            .await?;
            tracing::info!("[DISCOVERY] Project {} produced a company profile", project_id);
        }

        Ok(DiscoveryTurn {
            reply: conversational_part(&text),
            state: merged.state,
            profile_complete: brief.is_some(),
            extraction_warning: merged.warning,
        })
    }
}
