use axum::{
    Router,
    middleware::from_fn,
    routing::{IntoMakeService, get},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    DeploymentImpl,
    middleware::{request_id_middleware, require_identity},
};

pub mod agent_executions;
pub mod agents;
pub mod health;
pub mod projects;
pub mod workflow_executions;

/// The `/api` tree. Everything except the health check requires an
/// [`Identity`](crate::middleware::Identity).
pub fn api(deployment: DeploymentImpl) -> Router {
    let tenant_routes = Router::new()
        .merge(projects::router())
        .merge(workflow_executions::router())
        .merge(agent_executions::router())
        .merge(agents::router())
        .layer(from_fn(require_identity));

    let base_routes = Router::new()
        .route("/health", get(health::health_check))
        .merge(tenant_routes)
        .with_state(deployment);

    Router::new()
        .nest("/api", base_routes)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
}

pub fn router(deployment: DeploymentImpl) -> IntoMakeService<Router> {
    api(deployment).into_make_service()
}
