//! Progress Event Publisher
//!
//! Polls the execution store for one project and turns state changes into
//! named events. Events are snapshots keyed by execution id: a subscriber
//! may see the same state twice after a reconnect and must treat events as
//! idempotent. Staleness is bounded by the poll interval.

use std::{collections::VecDeque, time::Duration};

use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::{
        agent_execution::{AgentExecution, AgentRole, Layer},
        execution_status::ExecutionStatus,
        workflow_execution::WorkflowExecution,
    },
};
use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowSnapshot {
    pub id: Uuid,
    pub status: ExecutionStatus,
    pub current_step: i64,
    pub current_step_name: Option<String>,
    pub total_steps: i64,
    pub completed_steps: i64,
    pub progress_percentage: f64,
    pub iteration: i64,
}

impl WorkflowSnapshot {
    /// Fields whose change is worth a `workflow.progress` event.
    fn differs_from(&self, other: &WorkflowSnapshot) -> bool {
        self.id != other.id
            || self.status != other.status
            || self.current_step != other.current_step
            || self.completed_steps != other.completed_steps
            || self.progress_percentage != other.progress_percentage
            || self.iteration != other.iteration
    }
}

impl From<&WorkflowExecution> for WorkflowSnapshot {
    fn from(workflow: &WorkflowExecution) -> Self {
        Self {
            id: workflow.id,
            status: workflow.status,
            current_step: workflow.current_step,
            current_step_name: workflow.current_step_name.clone(),
            total_steps: workflow.total_steps,
            completed_steps: workflow.completed_steps,
            progress_percentage: workflow.progress_percentage,
            iteration: workflow.iteration,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentSnapshot {
    pub id: Uuid,
    pub agent_role: AgentRole,
    pub agent_name: String,
    pub layer: Layer,
    pub status: ExecutionStatus,
    pub iteration: i64,
    pub execution_time_ms: Option<i64>,
}

impl From<&AgentExecution> for AgentSnapshot {
    fn from(execution: &AgentExecution) -> Self {
        Self {
            id: execution.id,
            agent_role: execution.agent_role,
            agent_name: execution.agent_name.clone(),
            layer: execution.layer,
            status: execution.status,
            iteration: execution.iteration,
            execution_time_ms: execution.execution_time_ms,
        }
    }
}

/// Latest workflow of a project and the agents that belong to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub workflow: Option<WorkflowSnapshot>,
    pub agents: Vec<AgentSnapshot>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub project_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowProgressPayload {
    pub workflow_execution_id: Uuid,
    pub status: ExecutionStatus,
    pub current_step: i64,
    pub current_step_name: Option<String>,
    pub total_steps: i64,
    pub completed_steps: i64,
    pub progress_percentage: f64,
    pub iteration: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct AgentEventPayload {
    pub agent_execution_id: Uuid,
    pub agent_role: AgentRole,
    pub agent_name: String,
    pub layer: Layer,
    pub status: ExecutionStatus,
    pub iteration: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Connected(ConnectedPayload),
    WorkflowProgress(WorkflowProgressPayload),
    Agent(AgentEventPayload),
}

impl ProgressEvent {
    /// SSE event name: `connected`, `workflow.progress` or `agent.<status>`.
    pub fn name(&self) -> String {
        match self {
            ProgressEvent::Connected(_) => "connected".to_string(),
            ProgressEvent::WorkflowProgress(_) => "workflow.progress".to_string(),
            ProgressEvent::Agent(payload) => format!("agent.{}", payload.status.event_suffix()),
        }
    }

    pub fn payload(&self) -> Value {
        let payload = match self {
            ProgressEvent::Connected(p) => serde_json::to_value(p),
            ProgressEvent::WorkflowProgress(p) => serde_json::to_value(p),
            ProgressEvent::Agent(p) => serde_json::to_value(p),
        };
        payload.unwrap_or(Value::Null)
    }
}

/// Events that take a subscriber from `previous` to `next`.
pub fn diff(previous: &ProgressSnapshot, next: &ProgressSnapshot, now: DateTime<Utc>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();

    if let Some(workflow) = &next.workflow {
        let changed = previous
            .workflow
            .as_ref()
            .is_none_or(|prev| workflow.differs_from(prev));
        if changed {
            events.push(ProgressEvent::WorkflowProgress(WorkflowProgressPayload {
                workflow_execution_id: workflow.id,
                status: workflow.status,
                current_step: workflow.current_step,
                current_step_name: workflow.current_step_name.clone(),
                total_steps: workflow.total_steps,
                completed_steps: workflow.completed_steps,
                progress_percentage: workflow.progress_percentage,
                iteration: workflow.iteration,
                timestamp: now,
            }));
        }
    }

    for agent in &next.agents {
        let changed = previous
            .agents
            .iter()
            .find(|prev| prev.id == agent.id)
            .is_none_or(|prev| prev.status != agent.status);
        if changed {
            events.push(ProgressEvent::Agent(AgentEventPayload {
                agent_execution_id: agent.id,
                agent_role: agent.agent_role,
                agent_name: agent.agent_name.clone(),
                layer: agent.layer,
                status: agent.status,
                iteration: agent.iteration,
                execution_time_ms: agent.execution_time_ms,
                timestamp: now,
            }));
        }
    }

    events
}

pub async fn load_snapshot(
    pool: &SqlitePool,
    tenant_id: Uuid,
    project_id: Uuid,
) -> Result<ProgressSnapshot, sqlx::Error> {
    let Some(workflow) = WorkflowExecution::find_latest_for_project(pool, tenant_id, project_id).await? else {
        return Ok(ProgressSnapshot::default());
    };
    let agents = AgentExecution::find_by_workflow(pool, tenant_id, workflow.id).await?;

    Ok(ProgressSnapshot {
        workflow: Some(WorkflowSnapshot::from(&workflow)),
        agents: agents.iter().map(AgentSnapshot::from).collect(),
    })
}

struct Subscription {
    pool: SqlitePool,
    tenant_id: Uuid,
    project_id: Uuid,
    poll_interval: Duration,
    previous: ProgressSnapshot,
    pending: VecDeque<ProgressEvent>,
    connected: bool,
    polled: bool,
}

#[derive(Clone)]
pub struct ProgressPublisher {
    db: DBService,
    poll_interval: Duration,
}

impl ProgressPublisher {
    pub fn new(db: DBService, poll_interval: Duration) -> Self {
        Self { db, poll_interval }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Endless stream for one project: `connected` first, then the current
    /// state, then changes as they are observed. Store errors are logged and
    /// the next poll carries on; the stream ends only when dropped.
    pub fn subscribe(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
    ) -> impl Stream<Item = ProgressEvent> + Send + use<> {
        let subscription = Subscription {
            pool: self.db.pool.clone(),
            tenant_id,
            project_id,
            poll_interval: self.poll_interval,
            previous: ProgressSnapshot::default(),
            pending: VecDeque::new(),
            connected: false,
            polled: false,
        };

        stream::unfold(subscription, |mut sub| async move {
            loop {
                if let Some(event) = sub.pending.pop_front() {
                    return Some((event, sub));
                }

                if !sub.connected {
                    sub.connected = true;
                    tracing::debug!("[PROGRESS] Subscriber connected to project {}", sub.project_id);
                    let event = ProgressEvent::Connected(ConnectedPayload {
                        project_id: sub.project_id,
                        timestamp: Utc::now(),
                    });
                    return Some((event, sub));
                }

                if sub.polled {
                    tokio::time::sleep(sub.poll_interval).await;
                }
                sub.polled = true;

                match load_snapshot(&sub.pool, sub.tenant_id, sub.project_id).await {
                    Ok(next) => {
                        sub.pending.extend(diff(&sub.previous, &next, Utc::now()));
                        sub.previous = next;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "[PROGRESS] Failed to poll project {}: {}",
                            sub.project_id,
                            e
                        );
                    }
                }
            }
        })
    }
}
