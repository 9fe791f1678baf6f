use std::{sync::Arc, time::Duration};

use anyhow::Error as AnyhowError;
use async_trait::async_trait;
use db::{
    DBService,
    models::{
        agent_execution::{AgentExecution, TransitionFields},
        execution_status::ExecutionStatus,
        project::{Project, ProjectError, ProjectStatus},
        workflow_execution::{WorkflowExecution, WorkflowExecutionError},
    },
};
use serde_json::json;
use services::services::{
    config::{Config, ConfigError},
    discovery_chat::DiscoveryChat,
    llm::ProviderError,
    orchestrator::{Orchestrator, OrchestratorError},
    progress::ProgressPublisher,
    retry::RetryCoordinator,
};
use sqlx::Error as SqlxError;
use thiserror::Error;
use tokio::sync::RwLock;

const INTERRUPTED: &str = "Interrupted by server restart";

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Sqlx(#[from] SqlxError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    WorkflowExecution(#[from] WorkflowExecutionError),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Other(#[from] AnyhowError),
}

#[async_trait]
pub trait Deployment: Clone + Send + Sync + 'static {
    async fn new() -> Result<Self, DeploymentError>;

    fn config(&self) -> &Arc<RwLock<Config>>;

    fn db(&self) -> &DBService;

    fn orchestrator(&self) -> &Orchestrator;

    fn retries(&self) -> &RetryCoordinator;

    fn progress(&self) -> &ProgressPublisher;

    fn discovery(&self) -> &DiscoveryChat;

    /// Settles executions a previous process left behind, call at startup.
    /// Running agents become FAILED; active workflows are closed and their
    /// projects marked accordingly. Retry executions still PENDING are left
    /// for the retry sweeper.
    async fn cleanup_orphan_executions(&self) -> Result<(), DeploymentError> {
        let pool = &self.db().pool;

        for execution in AgentExecution::find_running_all_tenants(pool).await? {
            tracing::info!(
                "Found orphaned agent execution {} ({})",
                execution.id,
                execution.agent_role
            );
            if let Err(e) = AgentExecution::transition(
                pool,
                execution.tenant_id,
                execution.id,
                ExecutionStatus::Failed,
                TransitionFields {
                    error: Some(INTERRUPTED.to_string()),
                    metadata: Some(json!({ "interrupted": true })),
                    ..Default::default()
                },
            )
            .await
            {
                tracing::error!(
                    "Failed to mark orphaned agent execution {} failed: {}",
                    execution.id,
                    e
                );
            }
        }

        for workflow in WorkflowExecution::find_active_all_tenants(pool).await? {
            let tenant_id = workflow.tenant_id;
            AgentExecution::cancel_non_terminal_for_workflow(pool, tenant_id, workflow.id, INTERRUPTED)
                .await?;

            // A workflow that never started is simply dropped.
            let (status, project_status) = if workflow.status == ExecutionStatus::Running {
                (ExecutionStatus::Failed, ProjectStatus::Failed)
            } else {
                (ExecutionStatus::Cancelled, ProjectStatus::Draft)
            };
            match WorkflowExecution::transition(
                pool,
                tenant_id,
                workflow.id,
                status,
                Some(INTERRUPTED.to_string()),
                Some(json!({ "interrupted": true })),
            )
            .await
            {
                Ok(_) => {
                    Project::update_status(pool, tenant_id, workflow.project_id, project_status)
                        .await?;
                    tracing::info!(
                        "Marked orphaned workflow {} as {}",
                        workflow.id,
                        status
                    );
                }
                Err(WorkflowExecutionError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Periodically runs retry executions nobody picked up.
    async fn spawn_retry_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.orchestrator().clone();
        let interval_secs = self.config().read().await.orchestrator.retry_sweep_interval_secs;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                interval.tick().await;
                match orchestrator.sweep_pending_retries().await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!("Resumed {} pending retries", count),
                    Err(e) => tracing::error!("Retry sweep failed: {}", e),
                }
            }
        })
    }
}
