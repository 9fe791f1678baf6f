//! Workflow Orchestrator
//!
//! Runs a project's agents layer by layer, scores the result and loops
//! back through refinement iterations until the quality bar is met or the
//! project's iteration cap is reached. Every state change goes through the
//! execution store's compare-and-set transitions, so a workflow can be
//! cancelled or crash at any point without leaving two owners of a record.

pub mod plan;
pub mod scoring;

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use backon::Retryable;
use dashmap::{DashMap, mapref::entry::Entry};
use db::{
    DBService,
    models::{
        agent_execution::{
            AgentExecution, AgentExecutionError, CreateAgentExecution, Layer, TransitionFields,
        },
        company_profile::CompanyProfile,
        execution_artifact::{CreateExecutionArtifact, ExecutionArtifact, ExecutionArtifactError},
        execution_status::ExecutionStatus,
        project::{Project, ProjectError, ProjectStatus},
        workflow_execution::{
            CreateWorkflowExecution, ProgressUpdate, WEBSITE_WORKFLOW, WorkflowExecution,
            WorkflowExecutionError,
        },
    },
};
use futures::future::{BoxFuture, FutureExt, join_all};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use self::{
    plan::{ExecutionMode, LayerPlan, PlanError, WorkflowPlan},
    scoring::QualityAggregate,
};
use crate::services::{
    agents::{AgentContext, AgentError, AgentRegistry, AgentRunOutput, AgentRunner, RefinementFeedback},
    config::OrchestratorConfig,
    llm::LlmProvider,
};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    WorkflowExecution(#[from] WorkflowExecutionError),
    #[error(transparent)]
    AgentExecution(#[from] AgentExecutionError),
    #[error(transparent)]
    Artifact(#[from] ExecutionArtifactError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Precondition(String),
}

enum IterationOutcome {
    Passed(QualityAggregate),
    NeedsRefinement(QualityAggregate),
    Failed { layer: Layer, reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
enum AgentOutcome {
    Completed,
    Failed(String),
    Cancelled,
    /// Another worker owns the record.
    Skipped,
}

const CANCELLED_BY_USER: &str = "Cancelled by user";

fn is_optional(execution: &AgentExecution) -> bool {
    execution
        .config
        .as_ref()
        .and_then(|c| c.get("optional"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn seed_input(profile: &CompanyProfile, feedback: Option<&RefinementFeedback>) -> Value {
    json!({
        "profile": profile.to_agent_input(),
        "feedback": feedback,
    })
}

fn quality_metadata(quality: &QualityAggregate, passed: bool) -> Value {
    json!({
        "qualityPassed": passed,
        "compositeScore": quality.composite,
        "metrics": quality.metrics,
    })
}

#[derive(Clone)]
pub struct Orchestrator {
    db: DBService,
    provider: Arc<dyn LlmProvider>,
    plan: Arc<WorkflowPlan>,
    config: OrchestratorConfig,
    /// Cancellation handle of the run currently driving each project.
    active: Arc<DashMap<Uuid, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        db: DBService,
        provider: Arc<dyn LlmProvider>,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        let plan = WorkflowPlan::website(&config);
        Self::with_plan(db, provider, plan, config)
    }

    pub fn with_plan(
        db: DBService,
        provider: Arc<dyn LlmProvider>,
        plan: WorkflowPlan,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        plan.validate()?;
        Ok(Self {
            db,
            provider,
            plan: Arc::new(plan),
            config,
            active: Arc::new(DashMap::new()),
        })
    }

    pub fn plan(&self) -> &WorkflowPlan {
        &self.plan
    }

    pub fn is_running(&self, project_id: Uuid) -> bool {
        self.active.contains_key(&project_id)
    }

    // ========== Dispatch ==========

    /// Starts a workflow for the project and drives it in the background.
    /// Returns the PENDING workflow execution of the first iteration.
    pub async fn dispatch(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        triggered_by: &str,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let (workflow, token) = self.start(tenant_id, project_id, triggered_by).await?;

        let orchestrator = self.clone();
        let first = workflow.clone();
        tokio::spawn(async move {
            orchestrator.drive(tenant_id, project_id, first, token).await;
        });

        Ok(workflow)
    }

    /// Same as [`Self::dispatch`] but drives the workflow to its end before
    /// returning the last workflow execution.
    pub async fn run_workflow(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        triggered_by: &str,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let (workflow, token) = self.start(tenant_id, project_id, triggered_by).await?;
        let last_id = self.drive(tenant_id, project_id, workflow, token).await;

        WorkflowExecution::find_by_id(&self.db.pool, tenant_id, last_id)
            .await?
            .ok_or(OrchestratorError::NotFound("Workflow execution"))
    }

    async fn start(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        triggered_by: &str,
    ) -> Result<(WorkflowExecution, CancellationToken), OrchestratorError> {
        let pool = &self.db.pool;
        let project = Project::find_by_id(pool, tenant_id, project_id)
            .await?
            .ok_or(OrchestratorError::NotFound("Project"))?;
        // Cancelled runs return the project to DRAFT; finished ones stay put.
        if project.status != ProjectStatus::Draft {
            return Err(OrchestratorError::Precondition(format!(
                "Project is {}, workflows start from DRAFT",
                project.status
            )));
        }
        let profile = CompanyProfile::find_by_project(pool, tenant_id, project_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::Precondition("Project has no company profile".to_string())
            })?;

        let token = CancellationToken::new();
        match self.active.entry(project_id) {
            Entry::Occupied(_) => {
                return Err(OrchestratorError::Precondition(
                    "A workflow is already running for this project".to_string(),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }

        let created =
            match Project::update_status(pool, tenant_id, project_id, ProjectStatus::InProgress).await {
                Ok(_) => {
                    self.create_iteration(
                        tenant_id,
                        project_id,
                        project.current_iteration,
                        &self.plan.all_layers(),
                        seed_input(&profile, None),
                        triggered_by,
                    )
                    .await
                }
                Err(e) => Err(e.into()),
            };

        match created {
            Ok(workflow) => {
                tracing::info!(
                    "[ORCHESTRATOR] Dispatched workflow {} for project {} (iteration {})",
                    workflow.id,
                    project_id,
                    workflow.iteration
                );
                Ok((workflow, token))
            }
            Err(e) => {
                self.active.remove(&project_id);
                Err(e)
            }
        }
    }

    /// Creates the workflow execution of one iteration and a PENDING agent
    /// execution for every planned agent of `layers`.
    async fn create_iteration(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        iteration: i64,
        layers: &[Layer],
        seed: Value,
        triggered_by: &str,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let pool = &self.db.pool;
        let planned: Vec<&LayerPlan> = layers.iter().filter_map(|l| self.plan.layer(*l)).collect();
        let total_steps: usize = planned.iter().map(|l| l.agents.len()).sum();

        let workflow = WorkflowExecution::create(
            pool,
            tenant_id,
            &CreateWorkflowExecution {
                project_id,
                workflow_type: WEBSITE_WORKFLOW.to_string(),
                iteration,
                total_steps: total_steps as i64,
                metadata: Some(json!({
                    "layers": layers,
                    "triggeredBy": triggered_by,
                })),
            },
        )
        .await?;

        for layer_plan in planned {
            for agent in &layer_plan.agents {
                AgentExecution::create(
                    pool,
                    tenant_id,
                    &CreateAgentExecution {
                        project_id,
                        workflow_execution_id: Some(workflow.id),
                        agent_name: AgentRegistry::runner(agent.role).name().to_string(),
                        agent_role: agent.role,
                        layer: layer_plan.layer,
                        iteration,
                        input: seed.clone(),
                        config: Some(json!({
                            "optional": agent.optional,
                            "timeoutSecs": layer_plan.timeout.as_secs(),
                        })),
                        metadata: None,
                    },
                )
                .await?;
            }
        }

        Ok(workflow)
    }

    // ========== Run loop ==========

    /// Runs iterations until the project completes, fails or is cancelled.
    /// Returns the id of the last workflow execution. Errors never escape:
    /// they fail this project's workflow and nothing else.
    async fn drive(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        first: WorkflowExecution,
        token: CancellationToken,
    ) -> Uuid {
        let mut workflow = first;

        loop {
            if token.is_cancelled() {
                self.abandon(tenant_id, workflow.id).await;
                break;
            }

            let outcome = self.run_iteration(tenant_id, &workflow, &token).await;
            match self
                .conclude(tenant_id, project_id, &workflow, outcome, &token)
                .await
            {
                Ok(Some(next)) => workflow = next,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(
                        "[ORCHESTRATOR] Workflow {} for project {} aborted: {}",
                        workflow.id,
                        project_id,
                        e
                    );
                    self.fail_workflow(tenant_id, project_id, workflow.id, &e.to_string())
                        .await;
                    break;
                }
            }
        }

        self.active.remove(&project_id);
        workflow.id
    }

    async fn run_iteration(
        &self,
        tenant_id: Uuid,
        workflow: &WorkflowExecution,
        token: &CancellationToken,
    ) -> Result<IterationOutcome, OrchestratorError> {
        let pool = &self.db.pool;

        match WorkflowExecution::transition(
            pool,
            tenant_id,
            workflow.id,
            ExecutionStatus::Running,
            None,
            None,
        )
        .await
        {
            Ok(_) => {}
            Err(WorkflowExecutionError::InvalidTransition { .. }) if token.is_cancelled() => {
                return Ok(IterationOutcome::Cancelled);
            }
            Err(e) => return Err(e.into()),
        }

        let executions = AgentExecution::find_by_workflow(pool, tenant_id, workflow.id).await?;
        let layers: Vec<LayerPlan> = self
            .plan
            .layers
            .iter()
            .filter(|lp| executions.iter().any(|e| e.layer == lp.layer))
            .cloned()
            .collect();
        let present: HashSet<Layer> = layers.iter().map(|l| l.layer).collect();
        let mut completed_layers: HashSet<Layer> = HashSet::new();

        for (step, layer_plan) in layers.iter().enumerate() {
            if token.is_cancelled() {
                return Ok(IterationOutcome::Cancelled);
            }

            // Dependencies outside this iteration completed in an earlier one.
            if let Some(missing) = layer_plan
                .depends_on
                .iter()
                .find(|dep| present.contains(*dep) && !completed_layers.contains(*dep))
            {
                return Ok(IterationOutcome::Failed {
                    layer: layer_plan.layer,
                    reason: format!("dependency {} has not completed", missing),
                });
            }

            WorkflowExecution::update_progress(
                pool,
                tenant_id,
                workflow.id,
                &ProgressUpdate {
                    current_step: step as i64 + 1,
                    current_step_name: Some(layer_plan.layer.to_string()),
                    completed_steps: 0,
                    progress_percentage: 0.0,
                },
            )
            .await?;
            tracing::info!(
                "[ORCHESTRATOR] Workflow {} iteration {}: running layer {}",
                workflow.id,
                workflow.iteration,
                layer_plan.layer
            );

            let layer_executions: Vec<AgentExecution> = executions
                .iter()
                .filter(|e| e.layer == layer_plan.layer)
                .cloned()
                .collect();
            let outcomes = self
                .run_layer(tenant_id, layer_plan, &layer_executions, token)
                .await;

            let mut failure = None;
            for (execution, outcome) in layer_executions.iter().zip(outcomes) {
                match outcome? {
                    AgentOutcome::Completed => {}
                    AgentOutcome::Cancelled if token.is_cancelled() => {
                        return Ok(IterationOutcome::Cancelled);
                    }
                    AgentOutcome::Failed(reason) if is_optional(execution) => {
                        tracing::warn!(
                            "[ORCHESTRATOR] Optional agent {} failed, continuing: {}",
                            execution.agent_role,
                            reason
                        );
                    }
                    AgentOutcome::Failed(reason) => {
                        if failure.is_none() {
                            failure = Some(format!("{}: {}", execution.agent_role, reason));
                        }
                    }
                    AgentOutcome::Cancelled | AgentOutcome::Skipped => {
                        if failure.is_none() {
                            failure =
                                Some(format!("{} did not run to completion", execution.agent_role));
                        }
                    }
                }
            }

            if let Some(reason) = failure {
                return Ok(IterationOutcome::Failed {
                    layer: layer_plan.layer,
                    reason,
                });
            }
            completed_layers.insert(layer_plan.layer);
        }

        if !present.contains(&Layer::Quality) {
            return Ok(IterationOutcome::Passed(QualityAggregate::default()));
        }

        let evaluations: Vec<Value> = AgentExecution::find_by_workflow(pool, tenant_id, workflow.id)
            .await?
            .into_iter()
            .filter(|e| e.layer == Layer::Quality && e.status == ExecutionStatus::Completed)
            .filter_map(|e| e.evaluation)
            .collect();
        let quality = scoring::aggregate(evaluations.iter());
        tracing::info!(
            "[ORCHESTRATOR] Workflow {} iteration {} scored {:?} (pass {:.2})",
            workflow.id,
            workflow.iteration,
            quality.composite,
            self.config.pass_score
        );

        if quality.passes(self.config.pass_score) {
            Ok(IterationOutcome::Passed(quality))
        } else {
            Ok(IterationOutcome::NeedsRefinement(quality))
        }
    }

    /// Parallel layers run every agent; sequential layers stop at the
    /// first agent that does not complete. Agents that never ran are left
    /// PENDING for the caller to cancel.
    async fn run_layer(
        &self,
        tenant_id: Uuid,
        layer_plan: &LayerPlan,
        executions: &[AgentExecution],
        token: &CancellationToken,
    ) -> Vec<Result<AgentOutcome, OrchestratorError>> {
        match layer_plan.mode {
            ExecutionMode::Parallel => {
                let runs: Vec<BoxFuture<'static, Result<AgentOutcome, OrchestratorError>>> = executions
                    .iter()
                    .map(|execution| {
                        let orchestrator = self.clone();
                        let execution = execution.clone();
                        let token = token.clone();
                        let timeout = layer_plan.timeout;
                        async move {
                            orchestrator
                                .run_agent(tenant_id, &execution, timeout, &token)
                                .await
                        }
                        .boxed()
                    })
                    .collect();
                join_all(runs).await
            }
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(executions.len());
                for execution in executions {
                    let outcome = self
                        .run_agent(tenant_id, execution, layer_plan.timeout, token)
                        .await;
                    let stop = !matches!(outcome, Ok(AgentOutcome::Completed))
                        && !is_optional(execution);
                    outcomes.push(outcome);
                    if stop {
                        break;
                    }
                }
                outcomes
            }
        }
    }

    async fn conclude(
        &self,
        tenant_id: Uuid,
        project_id: Uuid,
        workflow: &WorkflowExecution,
        outcome: Result<IterationOutcome, OrchestratorError>,
        token: &CancellationToken,
    ) -> Result<Option<WorkflowExecution>, OrchestratorError> {
        let pool = &self.db.pool;
        let outcome = outcome?;
        if token.is_cancelled() {
            return Ok(None);
        }

        match outcome {
            IterationOutcome::Passed(quality) => {
                self.finish_workflow(
                    tenant_id,
                    workflow.id,
                    ExecutionStatus::Completed,
                    None,
                    quality_metadata(&quality, true),
                )
                .await?;
                Project::update_status(pool, tenant_id, project_id, ProjectStatus::Completed).await?;
                tracing::info!(
                    "[ORCHESTRATOR] Project {} completed at iteration {}",
                    project_id,
                    workflow.iteration
                );
                Ok(None)
            }
            IterationOutcome::NeedsRefinement(quality) => {
                match Project::increment_iteration(pool, tenant_id, project_id).await {
                    Ok(project) => {
                        self.finish_workflow(
                            tenant_id,
                            workflow.id,
                            ExecutionStatus::Completed,
                            None,
                            quality_metadata(&quality, false),
                        )
                        .await?;

                        let profile = CompanyProfile::find_by_project(pool, tenant_id, project_id)
                            .await?
                            .ok_or_else(|| {
                                OrchestratorError::Precondition(
                                    "Project has no company profile".to_string(),
                                )
                            })?;
                        let feedback = quality.feedback(self.config.pass_score);
                        let layers = self.plan.refinement_layers(self.config.refinement_scope);
                        let next = self
                            .create_iteration(
                                tenant_id,
                                project_id,
                                project.current_iteration,
                                &layers,
                                seed_input(&profile, Some(&feedback)),
                                "refinement",
                            )
                            .await?;
                        tracing::info!(
                            "[ORCHESTRATOR] Project {} below quality bar, refinement iteration {} started",
                            project_id,
                            project.current_iteration
                        );
                        Ok(Some(next))
                    }
                    Err(ProjectError::IterationLimitReached(max_iterations)) => {
                        let reason = format!(
                            "Quality score {:.2} is below {:.2} after {} refinement iterations",
                            quality.composite.unwrap_or(0.0),
                            self.config.pass_score,
                            max_iterations
                        );
                        self.finish_workflow(
                            tenant_id,
                            workflow.id,
                            ExecutionStatus::Failed,
                            Some(reason.clone()),
                            quality_metadata(&quality, false),
                        )
                        .await?;
                        Project::update_status(pool, tenant_id, project_id, ProjectStatus::Failed)
                            .await?;
                        tracing::warn!("[ORCHESTRATOR] Project {} failed: {}", project_id, reason);
                        Ok(None)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            IterationOutcome::Failed { layer, reason } => {
                let reason = format!("Layer {} failed: {}", layer, reason);
                AgentExecution::cancel_non_terminal_for_workflow(pool, tenant_id, workflow.id, &reason)
                    .await?;
                self.finish_workflow(
                    tenant_id,
                    workflow.id,
                    ExecutionStatus::Failed,
                    Some(reason.clone()),
                    json!({ "failedLayer": layer }),
                )
                .await?;
                Project::update_status(pool, tenant_id, project_id, ProjectStatus::Failed).await?;
                tracing::warn!("[ORCHESTRATOR] Project {} failed: {}", project_id, reason);
                Ok(None)
            }
            IterationOutcome::Cancelled => Ok(None),
        }
    }

    /// Terminal workflow write that tolerates losing a race against cancel.
    async fn finish_workflow(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        status: ExecutionStatus,
        error: Option<String>,
        metadata: Value,
    ) -> Result<(), OrchestratorError> {
        match WorkflowExecution::transition(
            &self.db.pool,
            tenant_id,
            workflow_id,
            status,
            error,
            Some(metadata),
        )
        .await
        {
            Ok(_) => Ok(()),
            Err(WorkflowExecutionError::InvalidTransition { from, to }) => {
                tracing::info!(
                    "[ORCHESTRATOR] Workflow {} already {}, not moving to {}",
                    workflow_id,
                    from,
                    to
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best effort cleanup after an unexpected error.
    async fn fail_workflow(&self, tenant_id: Uuid, project_id: Uuid, workflow_id: Uuid, reason: &str) {
        let pool = &self.db.pool;
        if let Err(e) =
            AgentExecution::cancel_non_terminal_for_workflow(pool, tenant_id, workflow_id, reason).await
        {
            tracing::error!("[ORCHESTRATOR] Failed to cancel agents of workflow {}: {}", workflow_id, e);
        }
        if let Err(e) = self
            .finish_workflow(
                tenant_id,
                workflow_id,
                ExecutionStatus::Failed,
                Some(reason.to_string()),
                json!({ "aborted": true }),
            )
            .await
        {
            tracing::error!("[ORCHESTRATOR] Failed to mark workflow {} failed: {}", workflow_id, e);
        }
        if let Err(e) = Project::update_status(pool, tenant_id, project_id, ProjectStatus::Failed).await {
            tracing::error!("[ORCHESTRATOR] Failed to mark project {} failed: {}", project_id, e);
        }
    }

    /// Cancels a workflow that was created but never started.
    async fn abandon(&self, tenant_id: Uuid, workflow_id: Uuid) {
        let pool = &self.db.pool;
        if let Err(e) = AgentExecution::cancel_non_terminal_for_workflow(
            pool,
            tenant_id,
            workflow_id,
            CANCELLED_BY_USER,
        )
        .await
        {
            tracing::error!("[ORCHESTRATOR] Failed to cancel agents of workflow {}: {}", workflow_id, e);
        }
        if let Err(e) = self
            .finish_workflow(
                tenant_id,
                workflow_id,
                ExecutionStatus::Cancelled,
                Some(CANCELLED_BY_USER.to_string()),
                json!({}),
            )
            .await
        {
            tracing::error!("[ORCHESTRATOR] Failed to cancel workflow {}: {}", workflow_id, e);
        }
    }

    // ========== Agents ==========

    /// Upstream outputs are merged into the stored input under each
    /// role's output key, latest completed execution per role winning.
    async fn resolve_input(
        &self,
        tenant_id: Uuid,
        execution: &AgentExecution,
    ) -> Result<Value, OrchestratorError> {
        let mut input = match &execution.input {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        for upstream in
            AgentExecution::find_latest_outputs(&self.db.pool, tenant_id, execution.project_id).await?
        {
            if let Some(output) = upstream.output {
                input.insert(upstream.agent_role.output_key().to_string(), output);
            }
        }
        Ok(Value::Object(input))
    }

    async fn run_agent(
        &self,
        tenant_id: Uuid,
        execution: &AgentExecution,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<AgentOutcome, OrchestratorError> {
        let pool = &self.db.pool;
        let input = self.resolve_input(tenant_id, execution).await?;

        match AgentExecution::transition(
            pool,
            tenant_id,
            execution.id,
            ExecutionStatus::Running,
            TransitionFields {
                input: Some(input.clone()),
                ..Default::default()
            },
        )
        .await
        {
            Ok(_) => {}
            Err(AgentExecutionError::InvalidTransition {
                from: ExecutionStatus::Cancelled,
                ..
            }) => return Ok(AgentOutcome::Cancelled),
            Err(AgentExecutionError::InvalidTransition { from, .. }) => {
                tracing::warn!(
                    "[ORCHESTRATOR] Agent execution {} is {}, another worker owns it",
                    execution.id,
                    from
                );
                return Ok(AgentOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        }

        let ctx = AgentContext {
            tenant_id,
            project_id: execution.project_id,
            workflow_execution_id: execution.workflow_execution_id,
            agent_execution_id: execution.id,
            iteration: execution.iteration,
        };
        let runner = AgentRegistry::runner(execution.agent_role);
        let attempts = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result = tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("[ORCHESTRATOR] Agent execution {} interrupted by cancellation", execution.id);
                return self.cancel_execution(tenant_id, execution).await;
            }
            result = tokio::time::timeout(timeout, self.run_with_retries(runner, &input, &ctx, &attempts)) => {
                result.unwrap_or_else(|_| Err(AgentError::Timeout(timeout)))
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as i64;
        let attempts = attempts.load(Ordering::SeqCst);

        let outcome = match result {
            Ok(output) => {
                self.complete_execution(tenant_id, execution, output, elapsed_ms, attempts)
                    .await?
            }
            Err(error) => {
                self.fail_execution(tenant_id, execution, &error, elapsed_ms, attempts)
                    .await?
            }
        };

        if let Some(workflow_id) = execution.workflow_execution_id {
            self.record_progress(tenant_id, workflow_id).await?;
        }
        Ok(outcome)
    }

    /// Provider failures back off exponentially; an unparseable reply gets
    /// exactly one more attempt with a stricter prompt.
    async fn run_with_retries(
        &self,
        runner: &'static dyn AgentRunner,
        input: &Value,
        ctx: &AgentContext,
        attempts: &Arc<AtomicU32>,
    ) -> Result<AgentRunOutput, AgentError> {
        match self.run_with_backoff(runner, input, ctx, attempts, false).await {
            Err(AgentError::Parse(reason)) => {
                tracing::warn!(
                    "[ORCHESTRATOR] Agent {} reply unparseable ({}), retrying with strict prompt",
                    runner.role(),
                    reason
                );
                self.run_with_backoff(runner, input, ctx, attempts, true).await
            }
            other => other,
        }
    }

    async fn run_with_backoff(
        &self,
        runner: &'static dyn AgentRunner,
        input: &Value,
        ctx: &AgentContext,
        attempts: &Arc<AtomicU32>,
        strict: bool,
    ) -> Result<AgentRunOutput, AgentError> {
        let call = {
            let provider = Arc::clone(&self.provider);
            let input = input.clone();
            let ctx = ctx.clone();
            let attempts = Arc::clone(attempts);
            move || -> BoxFuture<'static, Result<AgentRunOutput, AgentError>> {
                let provider = Arc::clone(&provider);
                let input = input.clone();
                let ctx = ctx.clone();
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    runner.run(&input, &ctx, provider.as_ref(), strict).await
                }
                .boxed()
            }
        };
        call.retry(self.config.backoff())
            .when(|e: &AgentError| e.is_retryable())
            .notify(|err: &AgentError, dur: Duration| {
                tracing::warn!(
                    "[ORCHESTRATOR] Agent {} provider call failed, retrying after {:.2}s: {}",
                    runner.role(),
                    dur.as_secs_f64(),
                    err
                );
            })
            .await
    }

    async fn complete_execution(
        &self,
        tenant_id: Uuid,
        execution: &AgentExecution,
        output: AgentRunOutput,
        elapsed_ms: i64,
        attempts: u32,
    ) -> Result<AgentOutcome, OrchestratorError> {
        let mut tx = self.db.pool.begin().await?;

        for artifact in &output.artifacts {
            ExecutionArtifact::create(
                &mut *tx,
                tenant_id,
                &CreateExecutionArtifact {
                    project_id: execution.project_id,
                    agent_execution_id: execution.id,
                    path: artifact.path.clone(),
                    content: artifact.content.clone(),
                },
            )
            .await?;
        }

        let completed = AgentExecution::transition_on(
            &mut *tx,
            tenant_id,
            execution.id,
            ExecutionStatus::Completed,
            TransitionFields {
                output: Some(output.output),
                evaluation: output.evaluation,
                execution_time_ms: Some(elapsed_ms),
                metadata: Some(json!({
                    "attempts": attempts,
                    "artifactCount": output.artifacts.len(),
                })),
                ..Default::default()
            },
        )
        .await;

        match completed {
            Ok(_) => {
                tx.commit().await?;
                tracing::info!(
                    "[ORCHESTRATOR] Agent {} completed in {}ms ({} attempts)",
                    execution.agent_role,
                    elapsed_ms,
                    attempts
                );
                Ok(AgentOutcome::Completed)
            }
            Err(AgentExecutionError::InvalidTransition {
                from: ExecutionStatus::Cancelled,
                ..
            }) => Ok(AgentOutcome::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    async fn fail_execution(
        &self,
        tenant_id: Uuid,
        execution: &AgentExecution,
        error: &AgentError,
        elapsed_ms: i64,
        attempts: u32,
    ) -> Result<AgentOutcome, OrchestratorError> {
        let failed = AgentExecution::transition(
            &self.db.pool,
            tenant_id,
            execution.id,
            ExecutionStatus::Failed,
            TransitionFields {
                error: Some(error.to_string()),
                execution_time_ms: Some(elapsed_ms),
                metadata: Some(json!({
                    "errorKind": error.kind(),
                    "attempts": attempts,
                })),
                ..Default::default()
            },
        )
        .await;

        match failed {
            Ok(_) => {
                tracing::warn!(
                    "[ORCHESTRATOR] Agent {} failed after {} attempts: {}",
                    execution.agent_role,
                    attempts,
                    error
                );
                Ok(AgentOutcome::Failed(error.to_string()))
            }
            Err(AgentExecutionError::InvalidTransition {
                from: ExecutionStatus::Cancelled,
                ..
            }) => Ok(AgentOutcome::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    async fn cancel_execution(
        &self,
        tenant_id: Uuid,
        execution: &AgentExecution,
    ) -> Result<AgentOutcome, OrchestratorError> {
        match AgentExecution::transition(
            &self.db.pool,
            tenant_id,
            execution.id,
            ExecutionStatus::Cancelled,
            TransitionFields {
                error: Some(CANCELLED_BY_USER.to_string()),
                ..Default::default()
            },
        )
        .await
        {
            Ok(_) | Err(AgentExecutionError::InvalidTransition { .. }) => Ok(AgentOutcome::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    /// Progress is the share of planned roles with a COMPLETED execution.
    /// Failed and cancelled agents do not count.
    async fn record_progress(&self, tenant_id: Uuid, workflow_id: Uuid) -> Result<(), OrchestratorError> {
        let pool = &self.db.pool;
        let Some(workflow) = WorkflowExecution::find_by_id(pool, tenant_id, workflow_id).await? else {
            return Ok(());
        };
        let executions = AgentExecution::find_by_workflow(pool, tenant_id, workflow_id).await?;
        let completed_roles: HashSet<_> = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed)
            .map(|e| e.agent_role)
            .collect();
        let completed_steps = (completed_roles.len() as i64).min(workflow.total_steps);
        let percentage = if workflow.total_steps > 0 {
            completed_steps as f64 / workflow.total_steps as f64 * 100.0
        } else {
            100.0
        };

        WorkflowExecution::update_progress(
            pool,
            tenant_id,
            workflow_id,
            &ProgressUpdate {
                current_step: 0,
                current_step_name: None,
                completed_steps,
                progress_percentage: percentage,
            },
        )
        .await?;
        Ok(())
    }

    // ========== Cancellation ==========

    /// Stops a running workflow: in-flight agents are interrupted, pending
    /// and running executions become CANCELLED and the project returns to
    /// DRAFT.
    pub async fn cancel(
        &self,
        tenant_id: Uuid,
        workflow_execution_id: Uuid,
    ) -> Result<WorkflowExecution, OrchestratorError> {
        let pool = &self.db.pool;
        let workflow = WorkflowExecution::find_by_id(pool, tenant_id, workflow_execution_id)
            .await?
            .ok_or(OrchestratorError::NotFound("Workflow execution"))?;
        if workflow.status.is_terminal() {
            return Err(OrchestratorError::Precondition(format!(
                "Workflow execution is already {}",
                workflow.status
            )));
        }

        let token = self.active.get(&workflow.project_id).map(|t| t.clone());
        if let Some(token) = token {
            token.cancel();
        }

        let cancelled = AgentExecution::cancel_non_terminal_for_workflow(
            pool,
            tenant_id,
            workflow.id,
            CANCELLED_BY_USER,
        )
        .await?;

        let workflow = match WorkflowExecution::transition(
            pool,
            tenant_id,
            workflow.id,
            ExecutionStatus::Cancelled,
            Some(CANCELLED_BY_USER.to_string()),
            None,
        )
        .await
        {
            Ok(workflow) => workflow,
            Err(WorkflowExecutionError::InvalidTransition { .. }) => {
                WorkflowExecution::find_by_id(pool, tenant_id, workflow.id)
                    .await?
                    .ok_or(OrchestratorError::NotFound("Workflow execution"))?
            }
            Err(e) => return Err(e.into()),
        };
        Project::update_status(pool, tenant_id, workflow.project_id, ProjectStatus::Draft).await?;

        tracing::info!(
            "[ORCHESTRATOR] Cancelled workflow {} ({} agent executions stopped)",
            workflow.id,
            cancelled.len()
        );
        Ok(workflow)
    }

    // ========== Standalone executions ==========

    /// Runs one PENDING execution outside the layer loop, e.g. a retry.
    pub async fn run_standalone(
        &self,
        tenant_id: Uuid,
        execution_id: Uuid,
    ) -> Result<AgentExecution, OrchestratorError> {
        let pool = &self.db.pool;
        let execution = AgentExecution::find_by_id(pool, tenant_id, execution_id)
            .await?
            .ok_or(OrchestratorError::NotFound("Agent execution"))?;
        if execution.status != ExecutionStatus::Pending {
            return Err(OrchestratorError::Precondition(format!(
                "Agent execution is {}, expected PENDING",
                execution.status
            )));
        }

        let timeout = self
            .plan
            .timeout_for(execution.layer, self.config.standard_timeout());
        let outcome = self
            .run_agent(tenant_id, &execution, timeout, &CancellationToken::new())
            .await?;
        tracing::info!(
            "[ORCHESTRATOR] Standalone agent execution {} finished: {:?}",
            execution.id,
            outcome
        );

        AgentExecution::find_by_id(pool, tenant_id, execution_id)
            .await?
            .ok_or(OrchestratorError::NotFound("Agent execution"))
    }

    pub fn spawn_standalone(&self, tenant_id: Uuid, execution_id: Uuid) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            match orchestrator.run_standalone(tenant_id, execution_id).await {
                Ok(_) => {}
                Err(OrchestratorError::Precondition(reason)) => {
                    tracing::debug!("[ORCHESTRATOR] Skipping agent execution {}: {}", execution_id, reason);
                }
                Err(e) => {
                    tracing::error!("[ORCHESTRATOR] Agent execution {} failed to run: {}", execution_id, e);
                }
            }
        });
    }

    /// Picks up retry executions that were created but never started, for
    /// example because the process restarted in between.
    pub async fn sweep_pending_retries(&self) -> Result<usize, OrchestratorError> {
        let stale = AgentExecution::find_stale_retries_all_tenants(
            &self.db.pool,
            self.config.retry_sweep_grace_secs,
        )
        .await?;
        for execution in &stale {
            tracing::info!("[ORCHESTRATOR] Resuming pending retry {}", execution.id);
            self.spawn_standalone(execution.tenant_id, execution.id);
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests;
