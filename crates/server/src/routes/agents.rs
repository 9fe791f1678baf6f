use axum::{Router, response::Json as ResponseJson, routing::get};
use services::services::agents::{AgentRegistry, registry::AgentDescriptor};
use utils::response::ApiResponse;

use crate::DeploymentImpl;

/// Input and output schemas of every registered agent.
pub async fn get_agents() -> ResponseJson<ApiResponse<Vec<AgentDescriptor>>> {
    ResponseJson(ApiResponse::success(AgentRegistry::describe_all()))
}

pub fn router() -> Router<DeploymentImpl> {
    Router::new().route("/agents", get(get_agents))
}
