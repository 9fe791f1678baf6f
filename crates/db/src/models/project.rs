use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, Sqlite, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

pub const DEFAULT_MAX_ITERATIONS: i64 = 3;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Project not found")]
    NotFound,
    #[error("Project has reached its iteration limit of {0}")]
    IterationLimitReached(i64),
    #[error("Invalid project: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "project_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Draft,
    InProgress,
    Completed,
    Failed,
    Archived,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectStatus::Draft => write!(f, "DRAFT"),
            ProjectStatus::InProgress => write!(f, "IN_PROGRESS"),
            ProjectStatus::Completed => write!(f, "COMPLETED"),
            ProjectStatus::Failed => write!(f, "FAILED"),
            ProjectStatus::Archived => write!(f, "ARCHIVED"),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Project {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub status: ProjectStatus,
    pub current_iteration: i64,
    pub max_iterations: i64,
    /// Partial business facts gathered by the discovery conversation.
    #[ts(type = "Record<string, unknown> | null")]
    pub discovery_state: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateProject {
    pub name: String,
    pub max_iterations: Option<i64>,
}

impl Project {
    pub async fn create(
        pool: &SqlitePool,
        tenant_id: Uuid,
        data: &CreateProject,
    ) -> Result<Self, ProjectError> {
        let max_iterations = data.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        if max_iterations < 1 {
            return Err(ProjectError::Invalid(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if data.name.trim().is_empty() {
            return Err(ProjectError::Invalid("name must not be empty".to_string()));
        }

        let project = sqlx::query_as::<_, Project>(
            r#"INSERT INTO projects (id, tenant_id, name, max_iterations)
               VALUES (?1, ?2, ?3, ?4)
               RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(data.name.trim())
        .bind(max_iterations)
        .fetch_one(pool)
        .await?;

        Ok(project)
    }

    pub async fn find_by_id<'e, E>(
        executor: E,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Project>(r#"SELECT * FROM projects WHERE id = ?1 AND tenant_id = ?2"#)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_all(pool: &SqlitePool, tenant_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Project>(
            r#"SELECT * FROM projects WHERE tenant_id = ?1 ORDER BY created_at DESC, id DESC"#,
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await
    }

    pub async fn update_status(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
        status: ProjectStatus,
    ) -> Result<Self, ProjectError> {
        sqlx::query_as::<_, Project>(
            r#"UPDATE projects
               SET status = ?3, updated_at = datetime('now', 'subsec')
               WHERE id = ?1 AND tenant_id = ?2
               RETURNING *"#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(status)
        .fetch_optional(pool)
        .await?
        .ok_or(ProjectError::NotFound)
    }

    pub async fn update_discovery_state(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
        state: &Value,
    ) -> Result<Self, ProjectError> {
        sqlx::query_as::<_, Project>(
            r#"UPDATE projects
               SET discovery_state = ?3, updated_at = datetime('now', 'subsec')
               WHERE id = ?1 AND tenant_id = ?2
               RETURNING *"#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(state)
        .fetch_optional(pool)
        .await?
        .ok_or(ProjectError::NotFound)
    }

    /// Advances `current_iteration` by one, refusing to pass `max_iterations`.
    pub async fn increment_iteration(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Self, ProjectError> {
        let updated = sqlx::query_as::<_, Project>(
            r#"UPDATE projects
               SET current_iteration = current_iteration + 1,
                   updated_at = datetime('now', 'subsec')
               WHERE id = ?1 AND tenant_id = ?2 AND current_iteration < max_iterations
               RETURNING *"#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        match updated {
            Some(project) => Ok(project),
            None => match Self::find_by_id(pool, tenant_id, id).await? {
                Some(project) => Err(ProjectError::IterationLimitReached(project.max_iterations)),
                None => Err(ProjectError::NotFound),
            },
        }
    }

    /// Deletes the project; workflow executions, agent executions, artifacts
    /// and the company profile cascade with it.
    pub async fn delete(pool: &SqlitePool, tenant_id: Uuid, id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(r#"DELETE FROM projects WHERE id = ?1 AND tenant_id = ?2"#)
            .bind(id)
            .bind(tenant_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
