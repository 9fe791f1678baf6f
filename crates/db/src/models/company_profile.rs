use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, types::Json};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CompanyProfileError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Company profile not found")]
    NotFound,
    #[error("Invalid company profile: {0}")]
    Invalid(String),
}

/// Business facts every workflow starts from.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct CompanyProfile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub business_name: String,
    pub industry: String,
    pub description: String,
    #[ts(type = "string[]")]
    pub services: Json<Vec<String>>,
    pub location: Option<String>,
    pub target_audience: Option<String>,
    pub tone: Option<String>,
    #[ts(type = "string[]")]
    pub goals: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct UpsertCompanyProfile {
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

impl UpsertCompanyProfile {
    fn validate(&self) -> Result<(), CompanyProfileError> {
        if self.business_name.trim().is_empty() {
            return Err(CompanyProfileError::Invalid(
                "business_name must not be empty".into(),
            ));
        }
        if self.industry.trim().is_empty() {
            return Err(CompanyProfileError::Invalid("industry must not be empty".into()));
        }
        Ok(())
    }
}

impl CompanyProfile {
    /// Creates or replaces the profile of a project. The project must belong
    /// to the same tenant.
    pub async fn upsert(
        pool: &SqlitePool,
        tenant_id: Uuid,
        project_id: Uuid,
        data: &UpsertCompanyProfile,
    ) -> Result<Self, CompanyProfileError> {
        data.validate()?;

        let owned: Option<(Uuid,)> =
            sqlx::query_as(r#"SELECT id FROM projects WHERE id = ?1 AND tenant_id = ?2"#)
                .bind(project_id)
                .bind(tenant_id)
                .fetch_optional(pool)
                .await?;
        if owned.is_none() {
            return Err(CompanyProfileError::NotFound);
        }

        let profile = sqlx::query_as::<_, CompanyProfile>(
            r#"INSERT INTO company_profiles
                   (id, tenant_id, project_id, business_name, industry, description,
                    services, location, target_audience, tone, goals)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
               ON CONFLICT(project_id) DO UPDATE SET
                   business_name   = excluded.business_name,
                   industry        = excluded.industry,
                   description     = excluded.description,
                   services        = excluded.services,
                   location        = excluded.location,
                   target_audience = excluded.target_audience,
                   tone            = excluded.tone,
                   goals           = excluded.goals,
                   updated_at      = datetime('now', 'subsec')
               RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(project_id)
        .bind(data.business_name.trim())
        .bind(data.industry.trim())
        .bind(&data.description)
        .bind(Json(&data.services))
        .bind(&data.location)
        .bind(&data.target_audience)
        .bind(&data.tone)
        .bind(Json(&data.goals))
        .fetch_one(pool)
        .await?;

        Ok(profile)
    }

    pub async fn find_by_project(
        pool: &SqlitePool,
        tenant_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, CompanyProfile>(
            r#"SELECT * FROM company_profiles WHERE project_id = ?1 AND tenant_id = ?2"#,
        )
        .bind(project_id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// The profile as agent input: plain JSON without storage columns.
    pub fn to_agent_input(&self) -> serde_json::Value {
        serde_json::json!({
            "businessName": self.business_name,
            "industry": self.industry,
            "description": self.description,
            "services": self.services.0,
            "location": self.location,
            "targetAudience": self.target_audience,
            "tone": self.tone,
            "goals": self.goals.0,
        })
    }
}
