//! Retry Coordinator
//!
//! Replaces a FAILED agent execution with a fresh PENDING one. The failed
//! record is kept for lineage: it moves to CANCELLED and both records point
//! at each other through their metadata. Running the new execution is left
//! to the orchestrator.

use chrono::Utc;
use db::{
    DBService,
    models::{
        agent_execution::{AgentExecution, AgentExecutionError, CreateAgentExecution},
        execution_status::ExecutionStatus,
    },
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RetryError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Agent execution not found")]
    NotFound,
    #[error("Only FAILED executions can be retried, this one is {status}")]
    Precondition { status: ExecutionStatus },
    #[error(transparent)]
    Store(AgentExecutionError),
}

impl From<AgentExecutionError> for RetryError {
    fn from(err: AgentExecutionError) -> Self {
        match err {
            AgentExecutionError::Database(e) => RetryError::Database(e),
            AgentExecutionError::NotFound => RetryError::NotFound,
            AgentExecutionError::InvalidTransition { from, .. } => {
                RetryError::Precondition { status: from }
            }
            other => RetryError::Store(other),
        }
    }
}

#[derive(Clone)]
pub struct RetryCoordinator {
    db: DBService,
}

impl RetryCoordinator {
    pub fn new(db: DBService) -> Self {
        Self { db }
    }

    /// Supersedes the failed execution and creates its successor in one
    /// transaction. Returns the new PENDING execution.
    pub async fn retry(
        &self,
        tenant_id: Uuid,
        execution_id: Uuid,
        retriggered_by: &str,
    ) -> Result<AgentExecution, RetryError> {
        let mut tx = self.db.pool.begin().await?;

        // Write first: the transaction takes the write lock before any read.
        let now = Utc::now();
        let original = AgentExecution::supersede(
            &mut *tx,
            tenant_id,
            execution_id,
            json!({
                "retriedBy": retriggered_by,
                "retriedAt": now,
            }),
        )
        .await?;

        let retry = AgentExecution::create(
            &mut *tx,
            tenant_id,
            &CreateAgentExecution {
                project_id: original.project_id,
                workflow_execution_id: original.workflow_execution_id,
                agent_name: original.agent_name.clone(),
                agent_role: original.agent_role,
                layer: original.layer,
                iteration: original.iteration + 1,
                input: original.input.clone(),
                config: original.config.clone(),
                metadata: Some(json!({
                    "retryOf": original.id,
                    "originalIteration": original.iteration,
                    "retriggeredBy": retriggered_by,
                })),
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            "[RETRY] Agent execution {} retried as {} by {}",
            original.id,
            retry.id,
            retriggered_by
        );
        Ok(retry)
    }
}
