use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::{
    agent_execution::AgentExecutionError, company_profile::CompanyProfileError,
    execution_artifact::ExecutionArtifactError, project::ProjectError,
    workflow_execution::WorkflowExecutionError,
};
use deployment::DeploymentError;
use services::services::{
    discovery_chat::DiscoveryChatError, orchestrator::OrchestratorError, retry::RetryError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error, ts_rs::TS)]
#[ts(type = "string")]
pub enum ApiError {
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    CompanyProfile(#[from] CompanyProfileError),
    #[error(transparent)]
    AgentExecution(#[from] AgentExecutionError),
    #[error(transparent)]
    WorkflowExecution(#[from] WorkflowExecutionError),
    #[error(transparent)]
    Artifact(#[from] ExecutionArtifactError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Retry(#[from] RetryError),
    #[error(transparent)]
    DiscoveryChat(#[from] DiscoveryChatError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Bad Request: {0}")]
    BadRequest(String),
    #[error("Not Found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

type Classification = (StatusCode, &'static str);

const VALIDATION: Classification = (StatusCode::BAD_REQUEST, "ValidationError");
const PRECONDITION: Classification = (StatusCode::CONFLICT, "PreconditionError");
const NOT_FOUND: Classification = (StatusCode::NOT_FOUND, "NotFound");
const INVALID_TRANSITION: Classification = (StatusCode::CONFLICT, "InvalidTransitionError");
const DATABASE: Classification = (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError");
const PROVIDER: Classification = (StatusCode::BAD_GATEWAY, "ProviderError");
const INTERNAL: Classification = (StatusCode::INTERNAL_SERVER_ERROR, "InternalError");

fn classify_project(err: &ProjectError) -> Classification {
    match err {
        ProjectError::Database(_) => DATABASE,
        ProjectError::NotFound => NOT_FOUND,
        ProjectError::IterationLimitReached(_) => PRECONDITION,
        ProjectError::Invalid(_) => VALIDATION,
    }
}

fn classify_profile(err: &CompanyProfileError) -> Classification {
    match err {
        CompanyProfileError::Database(_) => DATABASE,
        CompanyProfileError::NotFound => NOT_FOUND,
        CompanyProfileError::Invalid(_) => VALIDATION,
    }
}

fn classify_agent_execution(err: &AgentExecutionError) -> Classification {
    match err {
        AgentExecutionError::Database(_) => DATABASE,
        AgentExecutionError::NotFound => NOT_FOUND,
        AgentExecutionError::InvalidTransition { .. } => INVALID_TRANSITION,
        AgentExecutionError::InvalidCursor(_) => VALIDATION,
    }
}

fn classify_workflow_execution(err: &WorkflowExecutionError) -> Classification {
    match err {
        WorkflowExecutionError::Database(_) => DATABASE,
        WorkflowExecutionError::NotFound => NOT_FOUND,
        WorkflowExecutionError::InvalidTransition { .. } => INVALID_TRANSITION,
    }
}

fn classify_artifact(err: &ExecutionArtifactError) -> Classification {
    match err {
        ExecutionArtifactError::Database(_) => DATABASE,
        ExecutionArtifactError::NotFound => NOT_FOUND,
        ExecutionArtifactError::InvalidPath(_) => VALIDATION,
    }
}

impl ApiError {
    fn classify(&self) -> Classification {
        match self {
            ApiError::Project(e) => classify_project(e),
            ApiError::CompanyProfile(e) => classify_profile(e),
            ApiError::AgentExecution(e) => classify_agent_execution(e),
            ApiError::WorkflowExecution(e) => classify_workflow_execution(e),
            ApiError::Artifact(e) => classify_artifact(e),
            ApiError::Orchestrator(err) => match err {
                OrchestratorError::Database(_) => DATABASE,
                OrchestratorError::Project(e) => classify_project(e),
                OrchestratorError::WorkflowExecution(e) => classify_workflow_execution(e),
                OrchestratorError::AgentExecution(e) => classify_agent_execution(e),
                OrchestratorError::Artifact(e) => classify_artifact(e),
                OrchestratorError::Plan(_) => INTERNAL,
                OrchestratorError::NotFound(_) => NOT_FOUND,
                OrchestratorError::Precondition(_) => PRECONDITION,
            },
            ApiError::Retry(err) => match err {
                RetryError::Database(_) => DATABASE,
                RetryError::NotFound => NOT_FOUND,
                RetryError::Precondition { .. } => PRECONDITION,
                RetryError::Store(e) => classify_agent_execution(e),
            },
            ApiError::DiscoveryChat(err) => match err {
                DiscoveryChatError::Database(_) => DATABASE,
                DiscoveryChatError::Project(e) => classify_project(e),
                DiscoveryChatError::Profile(e) => classify_profile(e),
                DiscoveryChatError::Provider(_) => PROVIDER,
                DiscoveryChatError::NotFound => NOT_FOUND,
                DiscoveryChatError::EmptyMessage => VALIDATION,
            },
            ApiError::Deployment(_) => INTERNAL,
            ApiError::Database(_) => DATABASE,
            ApiError::BadRequest(_) => VALIDATION,
            ApiError::NotFound(_) => NOT_FOUND,
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = self.classify();

        let error_message = match &self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Unauthorized(msg) => {
                msg.clone()
            }
            _ => self.to_string(),
        };
        if status_code.is_server_error() {
            tracing::error!("{}: {}", error_type, error_message);
        }

        let response = ApiResponse::<()>::error_with_code(error_type, &error_message);
        (status_code, Json(response)).into_response()
    }
}
