use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{
    agent_execution::AgentExecution, project::Project, workflow_execution::WorkflowExecution,
};

/// Store handle bound to one tenant. Lookups through it can only see that
/// tenant's rows; a record owned by another tenant reads as missing.
#[derive(Clone)]
pub struct TenantScope {
    pool: SqlitePool,
    tenant_id: Uuid,
}

impl TenantScope {
    pub(crate) fn new(pool: SqlitePool, tenant_id: Uuid) -> Self {
        Self { pool, tenant_id }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn project(&self, id: Uuid) -> Result<Option<Project>, sqlx::Error> {
        Project::find_by_id(&self.pool, self.tenant_id, id).await
    }

    pub async fn workflow_execution(&self, id: Uuid) -> Result<Option<WorkflowExecution>, sqlx::Error> {
        WorkflowExecution::find_by_id(&self.pool, self.tenant_id, id).await
    }

    pub async fn agent_execution(&self, id: Uuid) -> Result<Option<AgentExecution>, sqlx::Error> {
        AgentExecution::find_by_id(&self.pool, self.tenant_id, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DBService,
        models::{
            agent_execution::Layer,
            test_utils::{create_test_execution, create_test_project},
        },
    };

    #[tokio::test]
    async fn scope_only_sees_its_own_tenant() {
        let db = DBService::new_in_memory().await.unwrap();
        let owner = Uuid::new_v4();
        let project_id = create_test_project(&db.pool, owner, 3).await;
        let execution = create_test_execution(&db.pool, owner, project_id, Layer::Design).await;

        let mine = db.for_tenant(owner);
        assert_eq!(mine.tenant_id(), owner);
        assert_eq!(mine.project(project_id).await.unwrap().unwrap().id, project_id);
        assert!(mine.agent_execution(execution.id).await.unwrap().is_some());

        let theirs = db.for_tenant(Uuid::new_v4());
        assert!(theirs.project(project_id).await.unwrap().is_none());
        assert!(theirs.agent_execution(execution.id).await.unwrap().is_none());
        assert!(theirs.workflow_execution(Uuid::new_v4()).await.unwrap().is_none());
    }
}
