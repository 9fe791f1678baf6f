use std::str::FromStr;

use serde_json::json;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use uuid::Uuid;

use super::{
    agent_execution::{AgentExecution, AgentRole, CreateAgentExecution, Layer},
    project::{CreateProject, Project},
};

/// Fresh in-memory database with the real migrations applied. One
/// connection only: each sqlite `:memory:` connection is its own database.
pub(crate) async fn setup_test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("invalid sqlite config")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("failed to open sqlite memory db");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    pool
}

pub(crate) async fn create_test_project(
    pool: &SqlitePool,
    tenant_id: Uuid,
    max_iterations: i64,
) -> Uuid {
    Project::create(
        pool,
        tenant_id,
        &CreateProject {
            name: "Test Project".to_string(),
            max_iterations: Some(max_iterations),
        },
    )
    .await
    .expect("failed to create project")
    .id
}

pub(crate) async fn create_test_execution(
    pool: &SqlitePool,
    tenant_id: Uuid,
    project_id: Uuid,
    layer: Layer,
) -> AgentExecution {
    let agent_role = match layer {
        Layer::Orchestrator => AgentRole::ProjectPlanner,
        Layer::Discovery => AgentRole::BusinessAnalyst,
        Layer::Design => AgentRole::SiteArchitect,
        Layer::Content => AgentRole::Copywriter,
        Layer::Code => AgentRole::PageGenerator,
        Layer::Quality => AgentRole::SeoAuditor,
    };
    AgentExecution::create(
        pool,
        tenant_id,
        &CreateAgentExecution {
            project_id,
            workflow_execution_id: None,
            agent_name: agent_role.to_string(),
            agent_role,
            layer,
            iteration: 0,
            input: json!({}),
            config: None,
            metadata: None,
        },
    )
    .await
    .expect("failed to create agent execution")
}
