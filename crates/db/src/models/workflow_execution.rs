use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use super::execution_status::{ExecutionStatus, sql_status_list};

pub const WEBSITE_WORKFLOW: &str = "website_generation";

#[derive(Debug, Error)]
pub enum WorkflowExecutionError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Workflow execution not found")]
    NotFound,
    #[error("Invalid workflow execution transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub workflow_type: String,
    pub iteration: i64,
    pub status: ExecutionStatus,
    pub current_step: i64,
    pub current_step_name: Option<String>,
    pub total_steps: i64,
    pub completed_steps: i64,
    pub progress_percentage: f64,
    pub error: Option<String>,
    #[ts(type = "Record<string, unknown> | null")]
    pub metadata: Option<Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateWorkflowExecution {
    pub project_id: Uuid,
    pub workflow_type: String,
    pub iteration: i64,
    pub total_steps: i64,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub current_step: i64,
    pub current_step_name: Option<String>,
    pub completed_steps: i64,
    pub progress_percentage: f64,
}

impl WorkflowExecution {
    pub async fn create(
        pool: &SqlitePool,
        tenant_id: Uuid,
        data: &CreateWorkflowExecution,
    ) -> Result<Self, WorkflowExecutionError> {
        let execution = sqlx::query_as::<_, WorkflowExecution>(
            r#"INSERT INTO workflow_executions
                   (id, tenant_id, project_id, workflow_type, iteration, status, total_steps, metadata)
               VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', ?6, ?7)
               RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(data.project_id)
        .bind(&data.workflow_type)
        .bind(data.iteration)
        .bind(data.total_steps)
        .bind(&data.metadata)
        .fetch_one(pool)
        .await?;

        Ok(execution)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowExecution>(
            r#"SELECT * FROM workflow_executions WHERE id = ?1 AND tenant_id = ?2"#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await
    }

    /// Highest iteration first, so refinement runs supersede their parents.
    pub async fn find_latest_for_project(
        pool: &SqlitePool,
        tenant_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowExecution>(
            r#"SELECT * FROM workflow_executions
               WHERE tenant_id = ?1 AND project_id = ?2
               ORDER BY iteration DESC, created_at DESC, id DESC
               LIMIT 1"#,
        )
        .bind(tenant_id)
        .bind(project_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_project(
        pool: &SqlitePool,
        tenant_id: Uuid,
        project_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowExecution>(
            r#"SELECT * FROM workflow_executions
               WHERE tenant_id = ?1 AND project_id = ?2
               ORDER BY iteration ASC, created_at ASC"#,
        )
        .bind(tenant_id)
        .bind(project_id)
        .fetch_all(pool)
        .await
    }

    /// Compare-and-set status change following the same state machine as
    /// agent executions.
    pub async fn transition(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
        to: ExecutionStatus,
        error: Option<String>,
        metadata: Option<Value>,
    ) -> Result<Self, WorkflowExecutionError> {
        let predecessors = to.predecessors();

        if !predecessors.is_empty() {
            let sql = format!(
                r#"UPDATE workflow_executions SET
                       status = ?3,
                       error = COALESCE(?4, error),
                       metadata = CASE WHEN ?5 IS NULL THEN metadata
                                       ELSE json_patch(COALESCE(metadata, '{{}}'), ?5) END,
                       started_at = CASE WHEN ?3 = 'RUNNING'
                                         THEN datetime('now', 'subsec') ELSE started_at END,
                       completed_at = CASE WHEN ?3 IN ('COMPLETED', 'FAILED', 'CANCELLED')
                                           THEN datetime('now', 'subsec') ELSE completed_at END,
                       updated_at = datetime('now', 'subsec')
                   WHERE id = ?1 AND tenant_id = ?2 AND status IN ({})
                   RETURNING *"#,
                sql_status_list(predecessors)
            );

            let updated = sqlx::query_as::<_, WorkflowExecution>(&sql)
                .bind(id)
                .bind(tenant_id)
                .bind(to)
                .bind(error)
                .bind(metadata)
                .fetch_optional(pool)
                .await?;

            if let Some(execution) = updated {
                return Ok(execution);
            }
        }

        match Self::find_by_id(pool, tenant_id, id).await? {
            Some(current) => Err(WorkflowExecutionError::InvalidTransition {
                from: current.status,
                to,
            }),
            None => Err(WorkflowExecutionError::NotFound),
        }
    }

    /// Records progress. Step, percentage and completed steps only ever move
    /// forward within one workflow execution; the percentage is clamped to
    /// `[0, 100]`.
    pub async fn update_progress(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
        update: &ProgressUpdate,
    ) -> Result<Self, WorkflowExecutionError> {
        let percentage = update.progress_percentage.clamp(0.0, 100.0);

        sqlx::query_as::<_, WorkflowExecution>(
            r#"UPDATE workflow_executions SET
                   current_step = MAX(current_step, ?3),
                   current_step_name = COALESCE(?4, current_step_name),
                   completed_steps = MAX(completed_steps, ?5),
                   progress_percentage = MAX(progress_percentage, ?6),
                   updated_at = datetime('now', 'subsec')
               WHERE id = ?1 AND tenant_id = ?2
               RETURNING *"#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(update.current_step)
        .bind(&update.current_step_name)
        .bind(update.completed_steps)
        .bind(percentage)
        .fetch_optional(pool)
        .await?
        .ok_or(WorkflowExecutionError::NotFound)
    }

    /// RUNNING or PENDING workflows across all tenants, for startup cleanup.
    pub async fn find_active_all_tenants(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, WorkflowExecution>(
            r#"SELECT * FROM workflow_executions
               WHERE status IN ('PENDING', 'RUNNING')
               ORDER BY created_at ASC"#,
        )
        .fetch_all(pool)
        .await
    }
}
