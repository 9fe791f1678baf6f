use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use super::{
    Page, clamp_page_size,
    execution_status::{ExecutionStatus, sql_status_list},
};

#[derive(Debug, Error)]
pub enum AgentExecutionError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Agent execution not found")]
    NotFound,
    #[error("Invalid agent execution transition: {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    #[error("Unknown pagination cursor: {0}")]
    InvalidCursor(Uuid),
}

/// Workflow phases in their fixed execution order.
#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, TS,
)]
#[sqlx(type_name = "layer", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Layer {
    Orchestrator,
    Discovery,
    Design,
    Content,
    Code,
    Quality,
}

impl Layer {
    pub const ORDER: [Layer; 6] = [
        Layer::Orchestrator,
        Layer::Discovery,
        Layer::Design,
        Layer::Content,
        Layer::Code,
        Layer::Quality,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::Orchestrator => write!(f, "ORCHESTRATOR"),
            Layer::Discovery => write!(f, "DISCOVERY"),
            Layer::Design => write!(f, "DESIGN"),
            Layer::Content => write!(f, "CONTENT"),
            Layer::Code => write!(f, "CODE"),
            Layer::Quality => write!(f, "QUALITY"),
        }
    }
}

/// Every agent type the platform knows how to run.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[sqlx(type_name = "agent_role", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRole {
    ProjectPlanner,
    BusinessAnalyst,
    CompetitorResearcher,
    SiteArchitect,
    BrandDesigner,
    Copywriter,
    SeoStrategist,
    PageGenerator,
    SeoAuditor,
    AccessibilityAuditor,
}

impl AgentRole {
    pub const ALL: [AgentRole; 10] = [
        AgentRole::ProjectPlanner,
        AgentRole::BusinessAnalyst,
        AgentRole::CompetitorResearcher,
        AgentRole::SiteArchitect,
        AgentRole::BrandDesigner,
        AgentRole::Copywriter,
        AgentRole::SeoStrategist,
        AgentRole::PageGenerator,
        AgentRole::SeoAuditor,
        AgentRole::AccessibilityAuditor,
    ];

    /// Key under which this role's output is handed to downstream agents.
    pub fn output_key(self) -> &'static str {
        match self {
            AgentRole::ProjectPlanner => "plan",
            AgentRole::BusinessAnalyst => "businessAnalysis",
            AgentRole::CompetitorResearcher => "competitorResearch",
            AgentRole::SiteArchitect => "siteArchitecture",
            AgentRole::BrandDesigner => "brand",
            AgentRole::Copywriter => "copy",
            AgentRole::SeoStrategist => "seoStrategy",
            AgentRole::PageGenerator => "pages",
            AgentRole::SeoAuditor => "seoAudit",
            AgentRole::AccessibilityAuditor => "accessibilityAudit",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::ProjectPlanner => write!(f, "PROJECT_PLANNER"),
            AgentRole::BusinessAnalyst => write!(f, "BUSINESS_ANALYST"),
            AgentRole::CompetitorResearcher => write!(f, "COMPETITOR_RESEARCHER"),
            AgentRole::SiteArchitect => write!(f, "SITE_ARCHITECT"),
            AgentRole::BrandDesigner => write!(f, "BRAND_DESIGNER"),
            AgentRole::Copywriter => write!(f, "COPYWRITER"),
            AgentRole::SeoStrategist => write!(f, "SEO_STRATEGIST"),
            AgentRole::PageGenerator => write!(f, "PAGE_GENERATOR"),
            AgentRole::SeoAuditor => write!(f, "SEO_AUDITOR"),
            AgentRole::AccessibilityAuditor => write!(f, "ACCESSIBILITY_AUDITOR"),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct AgentExecution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_id: Uuid,
    pub workflow_execution_id: Option<Uuid>,
    pub agent_name: String,
    pub agent_role: AgentRole,
    pub layer: Layer,
    pub status: ExecutionStatus,
    pub iteration: i64,
    #[ts(type = "unknown")]
    pub input: Value,
    #[ts(type = "unknown")]
    pub output: Option<Value>,
    #[ts(type = "Record<string, unknown> | null")]
    pub evaluation: Option<Value>,
    #[ts(type = "Record<string, unknown> | null")]
    pub config: Option<Value>,
    #[ts(type = "Record<string, unknown> | null")]
    pub metadata: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
pub struct CreateAgentExecution {
    pub project_id: Uuid,
    pub workflow_execution_id: Option<Uuid>,
    pub agent_name: String,
    pub agent_role: AgentRole,
    pub layer: Layer,
    #[serde(default)]
    pub iteration: i64,
    #[ts(type = "unknown")]
    pub input: Value,
    #[ts(type = "Record<string, unknown> | null")]
    pub config: Option<Value>,
    #[ts(type = "Record<string, unknown> | null")]
    pub metadata: Option<Value>,
}

/// Columns written together with a status change. `metadata` is merged
/// into the stored object rather than replacing it. `input` records the
/// resolved input an agent was actually run with.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub evaluation: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
pub struct AgentExecutionFilters {
    pub project_id: Option<Uuid>,
    pub workflow_execution_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub layer: Option<Layer>,
    pub agent_role: Option<AgentRole>,
}

impl AgentExecution {
    pub async fn create<'e, E>(
        executor: E,
        tenant_id: Uuid,
        data: &CreateAgentExecution,
    ) -> Result<Self, AgentExecutionError>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let execution = sqlx::query_as::<_, AgentExecution>(
            r#"INSERT INTO agent_executions
                   (id, tenant_id, project_id, workflow_execution_id, agent_name,
                    agent_role, layer, status, iteration, input, config, metadata)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'PENDING', ?8, ?9, ?10, ?11)
               RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(data.project_id)
        .bind(data.workflow_execution_id)
        .bind(&data.agent_name)
        .bind(data.agent_role)
        .bind(data.layer)
        .bind(data.iteration)
        .bind(&data.input)
        .bind(&data.config)
        .bind(&data.metadata)
        .fetch_one(executor)
        .await?;

        Ok(execution)
    }

    pub async fn find_by_id<'e, E>(
        executor: E,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AgentExecution>(
            r#"SELECT * FROM agent_executions WHERE id = ?1 AND tenant_id = ?2"#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_workflow(
        pool: &SqlitePool,
        tenant_id: Uuid,
        workflow_execution_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AgentExecution>(
            r#"SELECT * FROM agent_executions
               WHERE tenant_id = ?1 AND workflow_execution_id = ?2
               ORDER BY created_at ASC, id ASC"#,
        )
        .bind(tenant_id)
        .bind(workflow_execution_id)
        .fetch_all(pool)
        .await
    }

    /// Moves an execution to `to` if, and only if, its current status is a
    /// legal predecessor. The check and the write are a single statement, so
    /// two callers racing on the same record cannot both succeed.
    pub async fn transition(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
        to: ExecutionStatus,
        fields: TransitionFields,
    ) -> Result<Self, AgentExecutionError> {
        let mut conn = pool.acquire().await?;
        Self::transition_on(&mut conn, tenant_id, id, to, fields).await
    }

    /// [`Self::transition`] on a caller-held connection, e.g. inside a
    /// transaction.
    pub async fn transition_on(
        conn: &mut SqliteConnection,
        tenant_id: Uuid,
        id: Uuid,
        to: ExecutionStatus,
        fields: TransitionFields,
    ) -> Result<Self, AgentExecutionError> {
        let predecessors = to.predecessors();

        if !predecessors.is_empty() {
            let sql = format!(
                r#"UPDATE agent_executions SET
                       status = ?3,
                       input = COALESCE(?9, input),
                       output = COALESCE(?4, output),
                       evaluation = COALESCE(?5, evaluation),
                       error = COALESCE(?6, error),
                       execution_time_ms = COALESCE(?7, execution_time_ms),
                       metadata = CASE WHEN ?8 IS NULL THEN metadata
                                       ELSE json_patch(COALESCE(metadata, '{{}}'), ?8) END,
                       started_at = CASE WHEN ?3 = 'RUNNING'
                                         THEN datetime('now', 'subsec') ELSE started_at END,
                       completed_at = CASE WHEN ?3 IN ('COMPLETED', 'FAILED', 'CANCELLED')
                                           THEN datetime('now', 'subsec') ELSE completed_at END,
                       updated_at = datetime('now', 'subsec')
                   WHERE id = ?1 AND tenant_id = ?2 AND status IN ({})
                   RETURNING *"#,
                sql_status_list(predecessors)
            );

            let updated = sqlx::query_as::<_, AgentExecution>(&sql)
                .bind(id)
                .bind(tenant_id)
                .bind(to)
                .bind(fields.output)
                .bind(fields.evaluation)
                .bind(fields.error)
                .bind(fields.execution_time_ms)
                .bind(fields.metadata)
                .bind(fields.input)
                .fetch_optional(&mut *conn)
                .await?;

            if let Some(execution) = updated {
                return Ok(execution);
            }
        }

        match Self::find_by_id(&mut *conn, tenant_id, id).await? {
            Some(current) => Err(AgentExecutionError::InvalidTransition {
                from: current.status,
                to,
            }),
            None => Err(AgentExecutionError::NotFound),
        }
    }

    /// Marks a FAILED execution CANCELLED because a retry replaces it. This is
    /// the only write that leaves a terminal state.
    pub async fn supersede(
        conn: &mut SqliteConnection,
        tenant_id: Uuid,
        id: Uuid,
        metadata: Value,
    ) -> Result<Self, AgentExecutionError> {
        let updated = sqlx::query_as::<_, AgentExecution>(
            r#"UPDATE agent_executions SET
                   status = 'CANCELLED',
                   metadata = json_patch(COALESCE(metadata, '{}'), ?3),
                   updated_at = datetime('now', 'subsec')
               WHERE id = ?1 AND tenant_id = ?2 AND status = 'FAILED'
               RETURNING *"#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(metadata)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(execution) = updated {
            return Ok(execution);
        }

        match Self::find_by_id(&mut *conn, tenant_id, id).await? {
            Some(current) => Err(AgentExecutionError::InvalidTransition {
                from: current.status,
                to: ExecutionStatus::Cancelled,
            }),
            None => Err(AgentExecutionError::NotFound),
        }
    }

    /// Cancels every PENDING or RUNNING execution of a workflow.
    pub async fn cancel_non_terminal_for_workflow(
        pool: &SqlitePool,
        tenant_id: Uuid,
        workflow_execution_id: Uuid,
        reason: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AgentExecution>(
            r#"UPDATE agent_executions SET
                   status = 'CANCELLED',
                   error = COALESCE(error, ?3),
                   completed_at = datetime('now', 'subsec'),
                   updated_at = datetime('now', 'subsec')
               WHERE tenant_id = ?1 AND workflow_execution_id = ?2
                 AND status IN ('PENDING', 'RUNNING')
               RETURNING *"#,
        )
        .bind(tenant_id)
        .bind(workflow_execution_id)
        .bind(reason)
        .fetch_all(pool)
        .await
    }

    /// Cursor pagination, newest first. `next_cursor` is the id of the last
    /// row on the page and is only set when more rows follow.
    pub async fn list(
        pool: &SqlitePool,
        tenant_id: Uuid,
        filters: &AgentExecutionFilters,
        cursor: Option<Uuid>,
        limit: Option<i64>,
    ) -> Result<Page<Self>, AgentExecutionError> {
        let limit = clamp_page_size(limit);

        if let Some(cursor) = cursor
            && Self::find_by_id(pool, tenant_id, cursor).await?.is_none()
        {
            return Err(AgentExecutionError::InvalidCursor(cursor));
        }

        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM agent_executions WHERE tenant_id = ");
        query.push_bind(tenant_id);
        if let Some(project_id) = filters.project_id {
            query.push(" AND project_id = ").push_bind(project_id);
        }
        if let Some(workflow_execution_id) = filters.workflow_execution_id {
            query
                .push(" AND workflow_execution_id = ")
                .push_bind(workflow_execution_id);
        }
        if let Some(status) = filters.status {
            query.push(" AND status = ").push_bind(status);
        }
        if let Some(layer) = filters.layer {
            query.push(" AND layer = ").push_bind(layer);
        }
        if let Some(agent_role) = filters.agent_role {
            query.push(" AND agent_role = ").push_bind(agent_role);
        }
        if let Some(cursor) = cursor {
            query
                .push(" AND (created_at, id) < (SELECT created_at, id FROM agent_executions WHERE id = ")
                .push_bind(cursor)
                .push(")");
        }
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit + 1);

        let mut items = query
            .build_query_as::<AgentExecution>()
            .fetch_all(pool)
            .await?;

        let has_more = items.len() as i64 > limit;
        items.truncate(limit as usize);
        let next_cursor = if has_more {
            items.last().map(|e| e.id)
        } else {
            None
        };

        Ok(Page {
            items,
            next_cursor,
            has_more,
        })
    }

    /// The `n` most recent completed QUALITY executions that carry scores.
    pub async fn find_latest_evaluations(
        pool: &SqlitePool,
        tenant_id: Uuid,
        project_id: Uuid,
        n: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AgentExecution>(
            r#"SELECT * FROM agent_executions
               WHERE tenant_id = ?1 AND project_id = ?2
                 AND layer = 'QUALITY' AND status = 'COMPLETED'
                 AND evaluation IS NOT NULL
               ORDER BY completed_at DESC, id DESC
               LIMIT ?3"#,
        )
        .bind(tenant_id)
        .bind(project_id)
        .bind(n.max(0))
        .fetch_all(pool)
        .await
    }

    /// Most recent completed output per agent role in a project, across all
    /// iterations. Downstream agents read their upstream context from here.
    pub async fn find_latest_outputs(
        pool: &SqlitePool,
        tenant_id: Uuid,
        project_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AgentExecution>(
            r#"SELECT * FROM agent_executions a
               WHERE a.tenant_id = ?1 AND a.project_id = ?2
                 AND a.status = 'COMPLETED' AND a.output IS NOT NULL
                 AND a.id = (
                     SELECT b.id FROM agent_executions b
                     WHERE b.tenant_id = a.tenant_id AND b.project_id = a.project_id
                       AND b.agent_role = a.agent_role
                       AND b.status = 'COMPLETED' AND b.output IS NOT NULL
                     ORDER BY b.completed_at DESC, b.rowid DESC
                     LIMIT 1)
               ORDER BY a.completed_at ASC, a.id ASC"#,
        )
        .bind(tenant_id)
        .bind(project_id)
        .fetch_all(pool)
        .await
    }

    /// RUNNING executions across all tenants. Only used at startup, when no
    /// worker can still own them.
    pub async fn find_running_all_tenants(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AgentExecution>(
            r#"SELECT * FROM agent_executions WHERE status = 'RUNNING' ORDER BY created_at ASC"#,
        )
        .fetch_all(pool)
        .await
    }

    /// PENDING retry successors older than `grace_secs`, across all tenants.
    /// Each row carries its own tenant id for the follow-up scoped calls.
    pub async fn find_stale_retries_all_tenants(
        pool: &SqlitePool,
        grace_secs: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, AgentExecution>(
            r#"SELECT * FROM agent_executions
               WHERE status = 'PENDING'
                 AND json_extract(metadata, '$.retryOf') IS NOT NULL
                 AND created_at <= datetime('now', 'subsec', ?1)
               ORDER BY created_at ASC"#,
        )
        .bind(format!("-{} seconds", grace_secs.max(0)))
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;
    use crate::models::test_utils::{create_test_execution, create_test_project, setup_test_pool};

    #[tokio::test]
    async fn happy_path_sets_timestamps_and_fields() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;
        let execution = create_test_execution(&pool, tenant, project_id, Layer::Design).await;
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert!(execution.started_at.is_none());

        let running = AgentExecution::transition(
            &pool,
            tenant,
            execution.id,
            ExecutionStatus::Running,
            TransitionFields::default(),
        )
        .await
        .expect("claim");
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        let done = AgentExecution::transition(
            &pool,
            tenant,
            execution.id,
            ExecutionStatus::Completed,
            TransitionFields {
                output: Some(json!({"routes": ["/"]})),
                execution_time_ms: Some(42),
                metadata: Some(json!({"attempts": 1})),
                ..Default::default()
            },
        )
        .await
        .expect("complete");

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.execution_time_ms, Some(42));
        assert_eq!(done.output, Some(json!({"routes": ["/"]})));
        assert_eq!(done.metadata, Some(json!({"attempts": 1})));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn completed_requires_running() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;
        let execution = create_test_execution(&pool, tenant, project_id, Layer::Code).await;

        let err = AgentExecution::transition(
            &pool,
            tenant,
            execution.id,
            ExecutionStatus::Completed,
            TransitionFields::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            AgentExecutionError::InvalidTransition {
                from: ExecutionStatus::Pending,
                to: ExecutionStatus::Completed
            }
        ));
        let unchanged = AgentExecution::find_by_id(&pool, tenant, execution.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.status, ExecutionStatus::Pending);
    }

    #[tokio::test]
    async fn concurrent_claims_have_exactly_one_winner() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;
        let id = create_test_execution(&pool, tenant, project_id, Layer::Content)
            .await
            .id;

        let claim = |pool: SqlitePool| async move {
            AgentExecution::transition(
                &pool,
                tenant,
                id,
                ExecutionStatus::Running,
                TransitionFields::default(),
            )
            .await
        };
        let (first, second) = tokio::join!(claim(pool.clone()), claim(pool.clone()));

        let results = [first, second];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let losers = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(AgentExecutionError::InvalidTransition {
                        from: ExecutionStatus::Running,
                        to: ExecutionStatus::Running
                    })
                )
            })
            .count();
        assert_eq!(winners, 1);
        assert_eq!(losers, 1);
    }

    #[tokio::test]
    async fn cross_tenant_transition_is_not_found() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;
        let execution = create_test_execution(&pool, tenant, project_id, Layer::Design).await;

        let err = AgentExecution::transition(
            &pool,
            Uuid::new_v4(),
            execution.id,
            ExecutionStatus::Running,
            TransitionFields::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentExecutionError::NotFound));
    }

    #[tokio::test]
    async fn pagination_walks_full_result_set_once() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;
        for _ in 0..7 {
            create_test_execution(&pool, tenant, project_id, Layer::Quality).await;
        }
        // Noise from another tenant must never appear.
        let other = Uuid::new_v4();
        let other_project = create_test_project(&pool, other, 3).await;
        create_test_execution(&pool, other, other_project, Layer::Quality).await;

        let filters = AgentExecutionFilters::default();
        let full = AgentExecution::list(&pool, tenant, &filters, None, Some(100))
            .await
            .unwrap();
        assert_eq!(full.items.len(), 7);
        assert!(!full.has_more);
        assert!(full.next_cursor.is_none());

        let mut walked = Vec::new();
        let mut cursor = None;
        loop {
            let page = AgentExecution::list(&pool, tenant, &filters, cursor, Some(3))
                .await
                .unwrap();
            assert!(page.items.len() <= 3);
            walked.extend(page.items.iter().map(|e| e.id));
            match page.next_cursor {
                Some(next) => {
                    assert!(page.has_more);
                    cursor = Some(next);
                }
                None => break,
            }
        }

        let expected: Vec<Uuid> = full.items.iter().map(|e| e.id).collect();
        assert_eq!(walked, expected);
        assert_eq!(walked.iter().collect::<HashSet<_>>().len(), 7);
    }

    #[tokio::test]
    async fn list_filters_and_page_size_bounds() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;
        create_test_execution(&pool, tenant, project_id, Layer::Design).await;
        create_test_execution(&pool, tenant, project_id, Layer::Quality).await;

        let filters = AgentExecutionFilters {
            layer: Some(Layer::Quality),
            ..Default::default()
        };
        let page = AgentExecution::list(&pool, tenant, &filters, None, None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].layer, Layer::Quality);

        let page = AgentExecution::list(&pool, tenant, &AgentExecutionFilters::default(), None, Some(0))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.has_more);

        let bogus = Uuid::new_v4();
        let err = AgentExecution::list(&pool, tenant, &AgentExecutionFilters::default(), Some(bogus), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentExecutionError::InvalidCursor(id) if id == bogus));
    }

    #[tokio::test]
    async fn latest_evaluations_only_returns_scored_quality_runs() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;

        for score in [0.4, 0.9] {
            let execution = create_test_execution(&pool, tenant, project_id, Layer::Quality).await;
            AgentExecution::transition(&pool, tenant, execution.id, ExecutionStatus::Running, TransitionFields::default())
                .await
                .unwrap();
            AgentExecution::transition(
                &pool,
                tenant,
                execution.id,
                ExecutionStatus::Completed,
                TransitionFields {
                    evaluation: Some(json!({"scores": {"seo": score}})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }
        // Completed without an evaluation: ignored.
        let bare = create_test_execution(&pool, tenant, project_id, Layer::Quality).await;
        AgentExecution::transition(&pool, tenant, bare.id, ExecutionStatus::Running, TransitionFields::default())
            .await
            .unwrap();
        AgentExecution::transition(&pool, tenant, bare.id, ExecutionStatus::Completed, TransitionFields::default())
            .await
            .unwrap();

        let latest = AgentExecution::find_latest_evaluations(&pool, tenant, project_id, 5)
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest.iter().all(|e| e.evaluation.is_some()));

        let one = AgentExecution::find_latest_evaluations(&pool, tenant, project_id, 1)
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn latest_outputs_keep_newest_per_role() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;

        for version in ["v1", "v2"] {
            let execution = create_test_execution(&pool, tenant, project_id, Layer::Code).await;
            AgentExecution::transition(&pool, tenant, execution.id, ExecutionStatus::Running, TransitionFields::default())
                .await
                .unwrap();
            AgentExecution::transition(
                &pool,
                tenant,
                execution.id,
                ExecutionStatus::Completed,
                TransitionFields {
                    output: Some(json!({"version": version})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }

        let latest = AgentExecution::find_latest_outputs(&pool, tenant, project_id)
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].output, Some(json!({"version": "v2"})));
    }

    #[tokio::test]
    async fn claim_records_resolved_input() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;
        let execution = create_test_execution(&pool, tenant, project_id, Layer::Design).await;

        let running = AgentExecution::transition(
            &pool,
            tenant,
            execution.id,
            ExecutionStatus::Running,
            TransitionFields {
                input: Some(json!({"profile": {"businessName": "Acme"}})),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(running.input["profile"]["businessName"], "Acme");
    }

    #[tokio::test]
    async fn supersede_requires_failed() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;
        let execution = create_test_execution(&pool, tenant, project_id, Layer::Code).await;

        let mut conn = pool.acquire().await.unwrap();
        let err = AgentExecution::supersede(&mut conn, tenant, execution.id, json!({"retriedBy": "u"}))
            .await
            .unwrap_err();
        drop(conn);
        assert!(matches!(err, AgentExecutionError::InvalidTransition { .. }));

        AgentExecution::transition(&pool, tenant, execution.id, ExecutionStatus::Running, TransitionFields::default())
            .await
            .unwrap();
        AgentExecution::transition(
            &pool,
            tenant,
            execution.id,
            ExecutionStatus::Failed,
            TransitionFields {
                error: Some("provider down".into()),
                metadata: Some(json!({"errorKind": "provider"})),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let cancelled = AgentExecution::supersede(&mut conn, tenant, execution.id, json!({"retriedBy": "u"}))
            .await
            .unwrap();
        assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
        let metadata = cancelled.metadata.unwrap();
        assert_eq!(metadata["retriedBy"], "u");
        assert_eq!(metadata["errorKind"], "provider");
    }

    #[tokio::test]
    async fn stale_retries_wait_out_the_grace_period() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;

        let old_retry = create_test_execution(&pool, tenant, project_id, Layer::Code).await;
        let fresh_retry = create_test_execution(&pool, tenant, project_id, Layer::Code).await;
        let old_plain = create_test_execution(&pool, tenant, project_id, Layer::Code).await;
        for (id, retry_of, age_secs) in [
            (old_retry.id, Some(Uuid::new_v4()), 120),
            (fresh_retry.id, Some(Uuid::new_v4()), 0),
            (old_plain.id, None, 120),
        ] {
            sqlx::query(
                r#"UPDATE agent_executions
                   SET metadata = ?2,
                       created_at = datetime('now', 'subsec', ?3)
                   WHERE id = ?1"#,
            )
            .bind(id)
            .bind(retry_of.map(|r| json!({"retryOf": r})))
            .bind(format!("-{} seconds", age_secs))
            .execute(&pool)
            .await
            .unwrap();
        }

        let stale = AgentExecution::find_stale_retries_all_tenants(&pool, 60)
            .await
            .unwrap();
        assert_eq!(stale.iter().map(|e| e.id).collect::<Vec<_>>(), vec![old_retry.id]);

        // Once started, a retry is no longer the sweeper's business.
        AgentExecution::transition(&pool, tenant, old_retry.id, ExecutionStatus::Running, TransitionFields::default())
            .await
            .unwrap();
        assert!(
            AgentExecution::find_stale_retries_all_tenants(&pool, 60)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn deleting_project_cascades_to_executions() {
        let pool = setup_test_pool().await;
        let tenant = Uuid::new_v4();
        let project_id = create_test_project(&pool, tenant, 3).await;
        let execution = create_test_execution(&pool, tenant, project_id, Layer::Code).await;

        crate::models::project::Project::delete(&pool, tenant, project_id)
            .await
            .unwrap();

        assert!(
            AgentExecution::find_by_id(&pool, tenant, execution.id)
                .await
                .unwrap()
                .is_none()
        );
    }
}
