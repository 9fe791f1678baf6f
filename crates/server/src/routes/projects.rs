use std::{collections::BTreeMap, convert::Infallible, time::Duration};

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        Json as ResponseJson,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post, put},
};
use db::models::{
    agent_execution::{AgentExecution, Layer},
    company_profile::{CompanyProfile, UpsertCompanyProfile},
    project::{CreateProject, Project},
    workflow_execution::WorkflowExecution,
};
use deployment::Deployment;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use services::services::{
    discovery_chat::DiscoveryTurn,
    orchestrator::{OrchestratorError, scoring::aggregate},
};
use ts_rs::TS;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{DeploymentImpl, error::ApiError, middleware::Identity};

const KEEP_ALIVE_SECS: u64 = 15;

async fn load_project(
    deployment: &DeploymentImpl,
    identity: &Identity,
    project_id: Uuid,
) -> Result<Project, ApiError> {
    deployment
        .db()
        .for_tenant(identity.tenant_id)
        .project(project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Project not found".to_string()))
}

pub async fn get_projects(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
) -> Result<ResponseJson<ApiResponse<Vec<Project>>>, ApiError> {
    let projects = Project::find_all(&deployment.db().pool, identity.tenant_id).await?;
    Ok(ResponseJson(ApiResponse::success(projects)))
}

pub async fn create_project(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Json(payload): Json<CreateProject>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<Project>>), ApiError> {
    let project = Project::create(&deployment.db().pool, identity.tenant_id, &payload).await?;
    tracing::info!("Project {} created by {}", project.id, identity.user_id);
    Ok((StatusCode::CREATED, ResponseJson(ApiResponse::success(project))))
}

pub async fn get_project(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(project_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Project>>, ApiError> {
    let project = load_project(&deployment, &identity, project_id).await?;
    Ok(ResponseJson(ApiResponse::success(project)))
}

pub async fn delete_project(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(project_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    let project = load_project(&deployment, &identity, project_id).await?;
    if deployment.orchestrator().is_running(project.id) {
        return Err(OrchestratorError::Precondition(
            "Cancel the running workflow before deleting the project".to_string(),
        )
        .into());
    }

    let rows = Project::delete(&deployment.db().pool, identity.tenant_id, project.id).await?;
    if rows == 0 {
        return Err(ApiError::NotFound("Project not found".to_string()));
    }
    tracing::info!("Project {} deleted by {}", project.id, identity.user_id);
    Ok(ResponseJson(ApiResponse::success(())))
}

pub async fn get_company_profile(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(project_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<CompanyProfile>>, ApiError> {
    let profile =
        CompanyProfile::find_by_project(&deployment.db().pool, identity.tenant_id, project_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Company profile not found".to_string()))?;
    Ok(ResponseJson(ApiResponse::success(profile)))
}

pub async fn upsert_company_profile(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<UpsertCompanyProfile>,
) -> Result<ResponseJson<ApiResponse<CompanyProfile>>, ApiError> {
    let profile = CompanyProfile::upsert(
        &deployment.db().pool,
        identity.tenant_id,
        project_id,
        &payload,
    )
    .await?;
    Ok(ResponseJson(ApiResponse::success(profile)))
}

pub async fn dispatch_workflow(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(project_id): Path<Uuid>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<WorkflowExecution>>), ApiError> {
    let workflow = deployment
        .orchestrator()
        .dispatch(identity.tenant_id, project_id, &identity.user_id)
        .await?;
    Ok((StatusCode::ACCEPTED, ResponseJson(ApiResponse::success(workflow))))
}

pub async fn get_workflows(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(project_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<WorkflowExecution>>>, ApiError> {
    let project = load_project(&deployment, &identity, project_id).await?;
    let workflows =
        WorkflowExecution::find_by_project(&deployment.db().pool, identity.tenant_id, project.id)
            .await?;
    Ok(ResponseJson(ApiResponse::success(workflows)))
}

#[derive(Debug, Deserialize)]
pub struct EvaluationsQuery {
    pub n: Option<i64>,
}

#[derive(Debug, Serialize, TS)]
pub struct EvaluationSummary {
    pub evaluations: Vec<AgentExecution>,
    pub metrics: BTreeMap<String, f64>,
    pub composite_score: Option<f64>,
    pub pass_score: f64,
    pub passed: bool,
}

/// Latest QUALITY evaluations of a project and their aggregate. `n`
/// defaults to the number of quality agents in one iteration.
pub async fn get_evaluations(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<EvaluationsQuery>,
) -> Result<ResponseJson<ApiResponse<EvaluationSummary>>, ApiError> {
    let project = load_project(&deployment, &identity, project_id).await?;
    let n = match query.n {
        Some(n) if n < 1 => {
            return Err(ApiError::BadRequest("n must be at least 1".to_string()));
        }
        Some(n) => n,
        None => deployment
            .orchestrator()
            .plan()
            .layer(Layer::Quality)
            .map(|layer| layer.agents.len() as i64)
            .unwrap_or(1),
    };

    let evaluations = AgentExecution::find_latest_evaluations(
        &deployment.db().pool,
        identity.tenant_id,
        project.id,
        n,
    )
    .await?;
    let quality = aggregate(evaluations.iter().filter_map(|e| e.evaluation.as_ref()));
    let pass_score = deployment.config().read().await.orchestrator.pass_score;

    Ok(ResponseJson(ApiResponse::success(EvaluationSummary {
        metrics: quality.metrics.clone(),
        composite_score: quality.composite,
        passed: quality.passes(pass_score),
        pass_score,
        evaluations,
    })))
}

/// Live workflow and agent progress of a project as server-sent events.
pub async fn stream_progress(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(project_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let project = load_project(&deployment, &identity, project_id).await?;

    let stream = deployment
        .progress()
        .subscribe(identity.tenant_id, project.id)
        .map(|event| {
            Ok(Event::default()
                .event(event.name())
                .data(event.payload().to_string()))
        });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keepalive"),
    ))
}

#[derive(Debug, Deserialize, TS)]
pub struct DiscoveryMessage {
    pub message: String,
}

pub async fn discovery_turn(
    Extension(identity): Extension<Identity>,
    State(deployment): State<DeploymentImpl>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<DiscoveryMessage>,
) -> Result<ResponseJson<ApiResponse<DiscoveryTurn>>, ApiError> {
    let turn = deployment
        .discovery()
        .respond(identity.tenant_id, project_id, &payload.message)
        .await?;
    Ok(ResponseJson(ApiResponse::success(turn)))
}

pub fn router() -> Router<DeploymentImpl> {
    let project_id_router = Router::new()
        .route("/", get(get_project).delete(delete_project))
        .route(
            "/company-profile",
            put(upsert_company_profile).get(get_company_profile),
        )
        .route("/workflows", post(dispatch_workflow).get(get_workflows))
        .route("/evaluations", get(get_evaluations))
        .route("/progress", get(stream_progress))
        .route("/discovery", post(discovery_turn));

    let projects_router = Router::new()
        .route("/", get(get_projects).post(create_project))
        .nest("/{id}", project_id_router);

    Router::new().nest("/projects", projects_router)
}
