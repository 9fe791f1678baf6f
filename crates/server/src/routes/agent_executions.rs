use axum::{
    Extension, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::{
    Page,
    agent_execution::{AgentExecution, AgentExecutionFilters, AgentRole, Layer},
    execution_artifact::ExecutionArtifact,
    execution_status::ExecutionStatus,
};
use deployment::Deployment;
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError, middleware::Identity};

/// Query string of the listing. Kept flat because `serde_urlencoded`
/// cannot flatten typed fields.
#[derive(Debug, Default, Deserialize, TS)]
pub struct ListAgentExecutionsQuery {
    pub project_id: Option<Uuid>,
    pub workflow_execution_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub layer: Option<Layer>,
    pub agent_role: Option<AgentRole>,
    pub cursor: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, TS)]
pub struct AgentExecutionDetail {
    #[serde(flatten)]
    #[ts(flatten)]
    pub execution: AgentExecution,
    pub artifacts: Vec<ExecutionArtifact>,
}

pub async fn list_agent_executions(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Query(query): Query<ListAgentExecutionsQuery>,
) -> Result<ResponseJson<ApiResponse<Page<AgentExecution>>>, ApiError> {
    let filters = AgentExecutionFilters {
        project_id: query.project_id,
        workflow_execution_id: query.workflow_execution_id,
        status: query.status,
        layer: query.layer,
        agent_role: query.agent_role,
    };
    let page = AgentExecution::list(
        &deployment.db().pool,
        identity.tenant_id,
        &filters,
        query.cursor,
        query.limit,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(page)))
}

pub async fn get_agent_execution(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(execution_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<AgentExecutionDetail>>, ApiError> {
    let scope = deployment.db().for_tenant(identity.tenant_id);
    let execution = scope
        .agent_execution(execution_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Agent execution not found".to_string()))?;
    let artifacts =
        ExecutionArtifact::find_by_execution(scope.pool(), scope.tenant_id(), execution.id).await?;

    Ok(ResponseJson(ApiResponse::success(AgentExecutionDetail {
        execution,
        artifacts,
    })))
}

/// Replaces a FAILED execution with a new PENDING one and starts it.
pub async fn retry_agent_execution(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(execution_id): Path<Uuid>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<AgentExecution>>), ApiError> {
    let retry = deployment
        .retries()
        .retry(identity.tenant_id, execution_id, &identity.user_id)
        .await?;
    deployment
        .orchestrator()
        .spawn_standalone(identity.tenant_id, retry.id);

    Ok((StatusCode::CREATED, ResponseJson(ApiResponse::success(retry))))
}

pub fn router() -> Router<DeploymentImpl> {
    let execution_router = Router::new()
        .route("/", get(get_agent_execution))
        .route("/retry", post(retry_agent_execution));

    let executions_router = Router::new()
        .route("/", get(list_agent_executions))
        .nest("/{id}", execution_router);

    Router::new().nest("/agent-executions", executions_router)
}
