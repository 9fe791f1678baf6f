use axum::{
    Extension, Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{agent_execution::AgentExecution, workflow_execution::WorkflowExecution};
use deployment::Deployment;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError, middleware::Identity};

async fn load_workflow(
    deployment: &DeploymentImpl,
    identity: &Identity,
    workflow_execution_id: Uuid,
) -> Result<WorkflowExecution, ApiError> {
    deployment
        .db()
        .for_tenant(identity.tenant_id)
        .workflow_execution(workflow_execution_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Workflow execution not found".to_string()))
}

pub async fn get_workflow_execution(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(workflow_execution_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<WorkflowExecution>>, ApiError> {
    let workflow = load_workflow(&deployment, &identity, workflow_execution_id).await?;
    Ok(ResponseJson(ApiResponse::success(workflow)))
}

pub async fn get_workflow_agent_executions(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(workflow_execution_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<AgentExecution>>>, ApiError> {
    let workflow = load_workflow(&deployment, &identity, workflow_execution_id).await?;
    let executions =
        AgentExecution::find_by_workflow(&deployment.db().pool, identity.tenant_id, workflow.id)
            .await?;
    Ok(ResponseJson(ApiResponse::success(executions)))
}

pub async fn cancel_workflow_execution(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(workflow_execution_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<WorkflowExecution>>, ApiError> {
    let workflow = deployment
        .orchestrator()
        .cancel(identity.tenant_id, workflow_execution_id)
        .await?;
    tracing::info!(
        "Workflow execution {} cancelled by {}",
        workflow.id,
        identity.user_id
    );
    Ok(ResponseJson(ApiResponse::success(workflow)))
}

pub fn router() -> Router<DeploymentImpl> {
    let workflow_router = Router::new()
        .route("/", get(get_workflow_execution))
        .route("/agent-executions", get(get_workflow_agent_executions))
        .route("/cancel", post(cancel_workflow_execution));

    Router::new().nest("/workflow-executions/{id}", workflow_router)
}
