use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ExecutionArtifactError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Artifact not found")]
    NotFound,
    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),
}

/// A file produced by an agent, e.g. a generated page.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct ExecutionArtifact {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub agent_execution_id: Uuid,
    pub path: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateExecutionArtifact {
    pub project_id: Uuid,
    pub agent_execution_id: Uuid,
    pub path: String,
    pub content: String,
}

fn validate_path(path: &str) -> Result<(), ExecutionArtifactError> {
    if path.is_empty()
        || path.starts_with('/')
        || path.split('/').any(|segment| segment == "..")
    {
        return Err(ExecutionArtifactError::InvalidPath(path.to_string()));
    }
    Ok(())
}

impl ExecutionArtifact {
    pub async fn create<'e, E>(
        executor: E,
        tenant_id: Uuid,
        data: &CreateExecutionArtifact,
    ) -> Result<Self, ExecutionArtifactError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        validate_path(&data.path)?;

        let artifact = sqlx::query_as::<_, ExecutionArtifact>(
            r#"INSERT INTO execution_artifacts (id, tenant_id, project_id, agent_execution_id, path, content)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)
               RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(data.project_id)
        .bind(data.agent_execution_id)
        .bind(&data.path)
        .bind(&data.content)
        .fetch_one(executor)
        .await?;

        Ok(artifact)
    }

    pub async fn find_by_execution(
        pool: &SqlitePool,
        tenant_id: Uuid,
        agent_execution_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ExecutionArtifact>(
            r#"SELECT * FROM execution_artifacts
               WHERE tenant_id = ?1 AND agent_execution_id = ?2
               ORDER BY path ASC"#,
        )
        .bind(tenant_id)
        .bind(agent_execution_id)
        .fetch_all(pool)
        .await
    }
}
