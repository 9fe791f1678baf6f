use std::{sync::Arc, time::Duration};

use db::{
    DBService,
    models::{
        agent_execution::{AgentExecution, AgentRole, Layer},
        company_profile::{CompanyProfile, UpsertCompanyProfile},
        execution_artifact::ExecutionArtifact,
        execution_status::ExecutionStatus,
        project::{CreateProject, Project, ProjectStatus},
        workflow_execution::WorkflowExecution,
    },
};
use futures::StreamExt;
use serde_json::{Value, json};
use uuid::Uuid;

use super::*;
use crate::services::{
    llm::{ScriptedProvider, ScriptedReply},
    progress::{ProgressEvent, ProgressPublisher},
    retry::RetryCoordinator,
};

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..Default::default()
    }
}

fn fenced(value: Value) -> ScriptedReply {
    ScriptedReply::Text(format!("```json\n{}\n```", value))
}

fn audit(score: f64) -> ScriptedReply {
    fenced(json!({
        "scores": {"overall": score},
        "issues": if score < 0.7 { vec!["hero image has no alt text"] } else { vec![] }
    }))
}

/// Valid replies for every role below QUALITY.
fn script_builders(provider: &ScriptedProvider) {
    provider
        .always(
            "PROJECT_PLANNER",
            fenced(json!({
                "summary": "Five page bakery site",
                "primaryGoal": "Catering enquiries",
                "pages": [{"slug": "home", "title": "Home", "purpose": "Introduce the bakery"}],
                "callsToAction": ["Order a cake"]
            })),
        )
        .always(
            "BUSINESS_ANALYST",
            fenced(json!({
                "positioning": "The harbour's neighbourhood sourdough bakery",
                "valuePropositions": ["Baked fresh every morning"]
            })),
        )
        .always(
            "COMPETITOR_RESEARCHER",
            fenced(json!({
                "competitors": [],
                "differentiators": ["Long fermented sourdough"]
            })),
        )
        .always(
            "SITE_ARCHITECT",
            fenced(json!({
                "routes": [
                    {"path": "/", "title": "Home", "sections": ["hero"]},
                    {"path": "/menu", "title": "Menu", "sections": ["breads"]},
                    {"path": "/contact", "title": "Contact", "sections": ["form"]}
                ],
                "navigation": ["/", "/menu", "/contact"]
            })),
        )
        .always(
            "BRAND_DESIGNER",
            fenced(json!({
                "palette": {
                    "primary": "#8b4513",
                    "secondary": "#f5deb3",
                    "accent": "#2e8b57",
                    "background": "#fff",
                    "text": "#222222"
                },
                "typography": {"heading": "Playfair Display", "body": "Inter"},
                "voice": "Warm and neighbourly"
            })),
        )
        .always(
            "COPYWRITER",
            fenced(json!({
                "pages": [{
                    "path": "/",
                    "headline": "Sourdough baked by the docks",
                    "body": ["Fresh bread every morning."],
                    "callToAction": "Order a cake"
                }]
            })),
        )
        .always(
            "SEO_STRATEGIST",
            fenced(json!({
                "pages": [{
                    "path": "/",
                    "title": "Harbor Bakery | Portland sourdough",
                    "metaDescription": "Sourdough, pastries and wedding cakes baked fresh every morning in Portland, Maine.",
                    "primaryKeyword": "portland bakery",
                    "secondaryKeywords": ["sourdough portland"]
                }]
            })),
        )
        .always(
            "PAGE_GENERATOR",
            fenced(json!({
                "files": [
                    {"path": "index.html", "content": "<html><body><h1>Harbor Bakery</h1></body></html>"},
                    {"path": "styles.css", "content": "body { color: #222222; }"}
                ]
            })),
        );
}

fn script_audits(provider: &ScriptedProvider, scores: &[f64]) {
    for score in scores {
        provider.push("SEO_AUDITOR", audit(*score));
        provider.push("ACCESSIBILITY_AUDITOR", audit(*score));
    }
}

async fn setup(max_iterations: i64) -> (DBService, Uuid, Uuid) {
    let db = DBService::new_in_memory().await.unwrap();
    let tenant_id = Uuid::new_v4();
    let project = Project::create(
        &db.pool,
        tenant_id,
        &CreateProject {
            name: "Harbor Bakery".to_string(),
            max_iterations: Some(max_iterations),
        },
    )
    .await
    .unwrap();
    CompanyProfile::upsert(
        &db.pool,
        tenant_id,
        project.id,
        &UpsertCompanyProfile {
            business_name: "Harbor Bakery".to_string(),
            industry: "bakery".to_string(),
            description: "Sourdough and pastries by the docks".to_string(),
            services: vec!["Catering".to_string(), "Wedding cakes".to_string()],
            location: Some("Portland, ME".to_string()),
            target_audience: None,
            tone: Some("warm".to_string()),
            goals: vec!["More catering leads".to_string()],
        },
    )
    .await
    .unwrap();
    (db, tenant_id, project.id)
}

fn orchestrator(db: &DBService, provider: &Arc<ScriptedProvider>) -> Orchestrator {
    let provider: Arc<dyn LlmProvider> = provider.clone();
    Orchestrator::new(db.clone(), provider, fast_config()).unwrap()
}

async fn workflows_by_iteration(db: &DBService, tenant_id: Uuid, project_id: Uuid) -> Vec<WorkflowExecution> {
    let mut workflows = WorkflowExecution::find_by_project(&db.pool, tenant_id, project_id)
        .await
        .unwrap();
    workflows.sort_by_key(|w| w.iteration);
    workflows
}

async fn execution_for(db: &DBService, tenant_id: Uuid, workflow_id: Uuid, role: AgentRole) -> AgentExecution {
    AgentExecution::find_by_workflow(&db.pool, tenant_id, workflow_id)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.agent_role == role)
        .unwrap()
}

#[tokio::test]
async fn refines_until_quality_passes() {
    let (db, tenant_id, project_id) = setup(3).await;
    let provider = Arc::new(ScriptedProvider::new());
    script_builders(&provider);
    script_audits(&provider, &[0.5, 0.5, 0.9]);

    let last = orchestrator(&db, &provider)
        .run_workflow(tenant_id, project_id, "owner@example.com")
        .await
        .unwrap();

    assert_eq!(last.status, ExecutionStatus::Completed);
    assert_eq!(last.iteration, 2);
    assert_eq!(last.progress_percentage, 100.0);

    let project = Project::find_by_id(&db.pool, tenant_id, project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(project.current_iteration, 2);
    assert_eq!(project.status, ProjectStatus::Completed);

    let workflows = workflows_by_iteration(&db, tenant_id, project_id).await;
    assert_eq!(workflows.iter().map(|w| w.iteration).collect::<Vec<_>>(), vec![0, 1, 2]);
    for earlier in &workflows[..2] {
        assert_eq!(earlier.status, ExecutionStatus::Completed);
        assert_eq!(earlier.metadata.as_ref().unwrap()["qualityPassed"], false);
    }

    // Refinement iterations only re-run CODE and QUALITY.
    let refined = AgentExecution::find_by_workflow(&db.pool, tenant_id, workflows[1].id)
        .await
        .unwrap();
    assert_eq!(refined.len(), 3);
    assert!(refined.iter().all(|e| matches!(e.layer, Layer::Code | Layer::Quality)));

    let generator_calls = provider.calls_for("PAGE_GENERATOR");
    assert_eq!(generator_calls.len(), 3);
    assert!(!generator_calls[0].user_prompt.contains("pass mark"));
    assert!(generator_calls[1].user_prompt.contains("hero image has no alt text"));
    assert!(generator_calls[1].user_prompt.contains("index.html"));

    let generator = execution_for(&db, tenant_id, last.id, AgentRole::PageGenerator).await;
    let artifacts = ExecutionArtifact::find_by_execution(&db.pool, tenant_id, generator.id)
        .await
        .unwrap();
    let mut paths: Vec<_> = artifacts.iter().map(|a| a.path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, vec!["iteration-2/index.html", "iteration-2/styles.css"]);
}

#[tokio::test]
async fn fails_project_when_iterations_run_out() {
    let (db, tenant_id, project_id) = setup(1).await;
    let provider = Arc::new(ScriptedProvider::new());
    script_builders(&provider);
    provider
        .always("SEO_AUDITOR", audit(0.5))
        .always("ACCESSIBILITY_AUDITOR", audit(0.5));

    let last = orchestrator(&db, &provider)
        .run_workflow(tenant_id, project_id, "owner@example.com")
        .await
        .unwrap();

    assert_eq!(last.status, ExecutionStatus::Failed);
    assert_eq!(last.iteration, 1);
    assert!(last.error.as_deref().unwrap().contains("below"));

    let project = Project::find_by_id(&db.pool, tenant_id, project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(project.current_iteration, 1);
    assert_eq!(project.status, ProjectStatus::Failed);

    let workflows = workflows_by_iteration(&db, tenant_id, project_id).await;
    assert_eq!(workflows.len(), 2);
    assert_eq!(workflows[0].status, ExecutionStatus::Completed);
    assert_eq!(provider.calls_for("PAGE_GENERATOR").len(), 2);
}

#[tokio::test]
async fn layers_start_after_their_dependencies_finish() {
    let (db, tenant_id, project_id) = setup(1).await;
    let provider = Arc::new(ScriptedProvider::new());
    script_builders(&provider);
    script_audits(&provider, &[0.8]);

    let workflow = orchestrator(&db, &provider)
        .run_workflow(tenant_id, project_id, "owner@example.com")
        .await
        .unwrap();
    assert_eq!(workflow.status, ExecutionStatus::Completed);

    let executions = AgentExecution::find_by_workflow(&db.pool, tenant_id, workflow.id)
        .await
        .unwrap();
    assert_eq!(executions.len(), 10);
    for later in &executions {
        for earlier in executions.iter().filter(|e| e.layer < later.layer) {
            assert!(
                later.started_at.unwrap() >= earlier.completed_at.unwrap(),
                "{} started before {} finished",
                later.agent_role,
                earlier.agent_role
            );
        }
    }

    // The generator saw the outputs of DESIGN and CONTENT.
    let generator = execution_for(&db, tenant_id, workflow.id, AgentRole::PageGenerator).await;
    assert_eq!(generator.input["brand"]["voice"], "Warm and neighbourly");
    assert!(generator.input["seoStrategy"]["pages"].is_array());
}

#[tokio::test]
async fn unparseable_reply_is_retried_once_with_strict_prompt() {
    let (db, tenant_id, project_id) = setup(1).await;
    let provider = Arc::new(ScriptedProvider::new());
    script_builders(&provider);
    script_audits(&provider, &[0.9]);
    provider.push(
        "PROJECT_PLANNER",
        ScriptedReply::Text("Sure! I would plan a lovely site.".to_string()),
    );

    let workflow = orchestrator(&db, &provider)
        .run_workflow(tenant_id, project_id, "owner@example.com")
        .await
        .unwrap();
    assert_eq!(workflow.status, ExecutionStatus::Completed);

    let calls = provider.calls_for("PROJECT_PLANNER");
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].system_prompt.contains("could not be parsed"));
    assert!(calls[1].system_prompt.contains("could not be parsed"));

    let planner = execution_for(&db, tenant_id, workflow.id, AgentRole::ProjectPlanner).await;
    assert_eq!(planner.metadata.unwrap()["attempts"], 2);
}

#[tokio::test]
async fn provider_failures_exhaust_retries_and_fail_the_layer() {
    let (db, tenant_id, project_id) = setup(2).await;
    let provider = Arc::new(ScriptedProvider::new());
    script_builders(&provider);
    provider.always("BUSINESS_ANALYST", ScriptedReply::ServerError);

    let workflow = orchestrator(&db, &provider)
        .run_workflow(tenant_id, project_id, "owner@example.com")
        .await
        .unwrap();

    assert_eq!(workflow.status, ExecutionStatus::Failed);
    assert_eq!(workflow.metadata.as_ref().unwrap()["failedLayer"], "DISCOVERY");
    // First attempt plus three retries.
    assert_eq!(provider.calls_for("BUSINESS_ANALYST").len(), 4);

    let analyst = execution_for(&db, tenant_id, workflow.id, AgentRole::BusinessAnalyst).await;
    assert_eq!(analyst.status, ExecutionStatus::Failed);
    assert_eq!(analyst.metadata.as_ref().unwrap()["errorKind"], "PROVIDER_ERROR");
    assert_eq!(analyst.metadata.as_ref().unwrap()["attempts"], 4);

    let architect = execution_for(&db, tenant_id, workflow.id, AgentRole::SiteArchitect).await;
    assert_eq!(architect.status, ExecutionStatus::Cancelled);
    assert!(provider.calls_for("SITE_ARCHITECT").is_empty());

    let project = Project::find_by_id(&db.pool, tenant_id, project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(project.status, ProjectStatus::Failed);
    assert_eq!(project.current_iteration, 0);
}

#[tokio::test]
async fn optional_agent_failure_does_not_fail_the_layer() {
    let (db, tenant_id, project_id) = setup(1).await;
    let provider = Arc::new(ScriptedProvider::new());
    script_builders(&provider);
    script_audits(&provider, &[0.75]);
    provider.always("COMPETITOR_RESEARCHER", ScriptedReply::RateLimited);

    let workflow = orchestrator(&db, &provider)
        .run_workflow(tenant_id, project_id, "owner@example.com")
        .await
        .unwrap();

    assert_eq!(workflow.status, ExecutionStatus::Completed);
    let researcher =
        execution_for(&db, tenant_id, workflow.id, AgentRole::CompetitorResearcher).await;
    assert_eq!(researcher.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn slow_agent_times_out() {
    let (db, tenant_id, project_id) = setup(1).await;
    let provider = Arc::new(ScriptedProvider::new());
    script_builders(&provider);
    provider.push(
        "PROJECT_PLANNER",
        ScriptedReply::Delayed(
            Duration::from_secs(5),
            Box::new(ScriptedReply::Text("{}".to_string())),
        ),
    );

    let config = fast_config();
    let mut plan = WorkflowPlan::website(&config);
    plan.layers[0].timeout = Duration::from_millis(50);
    let dyn_provider: Arc<dyn LlmProvider> = provider.clone();
    let orchestrator = Orchestrator::with_plan(db.clone(), dyn_provider, plan, config).unwrap();

    let workflow = orchestrator
        .run_workflow(tenant_id, project_id, "owner@example.com")
        .await
        .unwrap();

    assert_eq!(workflow.status, ExecutionStatus::Failed);
    let planner = execution_for(&db, tenant_id, workflow.id, AgentRole::ProjectPlanner).await;
    assert_eq!(planner.status, ExecutionStatus::Failed);
    assert_eq!(planner.metadata.as_ref().unwrap()["errorKind"], "TIMEOUT_ERROR");
}

#[tokio::test]
async fn cancel_stops_running_workflow() {
    let (db, tenant_id, project_id) = setup(1).await;
    let provider = Arc::new(ScriptedProvider::new());
    script_builders(&provider);
    provider.push(
        "PROJECT_PLANNER",
        ScriptedReply::Delayed(
            Duration::from_secs(30),
            Box::new(ScriptedReply::Text("{}".to_string())),
        ),
    );
    let orchestrator = orchestrator(&db, &provider);

    let workflow = orchestrator
        .dispatch(tenant_id, project_id, "owner@example.com")
        .await
        .unwrap();
    assert!(matches!(
        orchestrator
            .dispatch(tenant_id, project_id, "owner@example.com")
            .await,
        Err(OrchestratorError::Precondition(_))
    ));

    let mut planner_running = false;
    for _ in 0..200 {
        let planner = execution_for(&db, tenant_id, workflow.id, AgentRole::ProjectPlanner).await;
        if planner.status == ExecutionStatus::Running {
            planner_running = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(planner_running);

    let cancelled = orchestrator.cancel(tenant_id, workflow.id).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);

    for _ in 0..200 {
        if !orchestrator.is_running(project_id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!orchestrator.is_running(project_id));

    let executions = AgentExecution::find_by_workflow(&db.pool, tenant_id, workflow.id)
        .await
        .unwrap();
    assert!(executions.iter().all(|e| e.status == ExecutionStatus::Cancelled));

    let project = Project::find_by_id(&db.pool, tenant_id, project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(project.status, ProjectStatus::Draft);

    assert!(matches!(
        orchestrator.cancel(tenant_id, workflow.id).await,
        Err(OrchestratorError::Precondition(_))
    ));
}

#[tokio::test]
async fn dispatch_requires_a_company_profile() {
    let db = DBService::new_in_memory().await.unwrap();
    let tenant_id = Uuid::new_v4();
    let project = Project::create(
        &db.pool,
        tenant_id,
        &CreateProject {
            name: "Empty".to_string(),
            max_iterations: None,
        },
    )
    .await
    .unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    let orchestrator = orchestrator(&db, &provider);

    assert!(matches!(
        orchestrator.dispatch(tenant_id, project.id, "owner").await,
        Err(OrchestratorError::Precondition(_))
    ));
    assert!(matches!(
        orchestrator.dispatch(Uuid::new_v4(), project.id, "owner").await,
        Err(OrchestratorError::NotFound(_))
    ));
    assert!(!orchestrator.is_running(project.id));
}

#[tokio::test]
async fn progress_never_drops_within_a_workflow() {
    let (db, tenant_id, project_id) = setup(3).await;
    let provider = Arc::new(ScriptedProvider::new());
    script_builders(&provider);
    script_audits(&provider, &[0.5, 0.5, 0.9]);

    let publisher = ProgressPublisher::new(db.clone(), Duration::from_millis(2));
    let mut events = Box::pin(publisher.subscribe(tenant_id, project_id));
    let stop = CancellationToken::new();
    let collector = tokio::spawn({
        let stop = stop.clone();
        async move {
            let mut seen = Vec::new();
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    event = events.next() => match event {
                        Some(ProgressEvent::WorkflowProgress(payload)) => seen.push(payload),
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            seen
        }
    });

    let last = orchestrator(&db, &provider)
        .run_workflow(tenant_id, project_id, "owner@example.com")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop.cancel();
    let seen = collector.await.unwrap();

    assert!(!seen.is_empty());
    for pair in seen.windows(2) {
        if pair[0].workflow_execution_id == pair[1].workflow_execution_id {
            assert!(
                pair[1].progress_percentage >= pair[0].progress_percentage,
                "workflow {} went from {} to {}",
                pair[0].workflow_execution_id,
                pair[0].progress_percentage,
                pair[1].progress_percentage
            );
            assert!(pair[1].completed_steps >= pair[0].completed_steps);
        } else {
            // A new refinement iteration starts over.
            assert!(pair[1].iteration > pair[0].iteration);
        }
    }
    let final_event = seen.last().unwrap();
    assert_eq!(final_event.workflow_execution_id, last.id);
    assert_eq!(final_event.progress_percentage, 100.0);
}

#[tokio::test]
async fn terminal_projects_cannot_be_redispatched() {
    let (db, tenant_id, project_id) = setup(1).await;
    let provider = Arc::new(ScriptedProvider::new());
    script_builders(&provider);
    provider
        .always("SEO_AUDITOR", audit(0.5))
        .always("ACCESSIBILITY_AUDITOR", audit(0.5));
    let orchestrator = orchestrator(&db, &provider);

    let last = orchestrator
        .run_workflow(tenant_id, project_id, "owner@example.com")
        .await
        .unwrap();
    assert_eq!(last.status, ExecutionStatus::Failed);

    assert!(matches!(
        orchestrator
            .dispatch(tenant_id, project_id, "owner@example.com")
            .await,
        Err(OrchestratorError::Precondition(_))
    ));
    assert!(!orchestrator.is_running(project_id));

    let workflows = workflows_by_iteration(&db, tenant_id, project_id).await;
    assert_eq!(workflows.len(), 2);
    let project = Project::find_by_id(&db.pool, tenant_id, project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(project.status, ProjectStatus::Failed);
    assert_eq!(provider.calls_for("PAGE_GENERATOR").len(), 2);
}

/// Fails the business analyst with two unparseable replies, so DISCOVERY
/// fails and every later layer is cancelled.
async fn failed_discovery_run(
    db: &DBService,
    tenant_id: Uuid,
    project_id: Uuid,
    provider: &Arc<ScriptedProvider>,
    orchestrator: &Orchestrator,
) -> WorkflowExecution {
    script_builders(provider);
    for _ in 0..2 {
        provider.push(
            "BUSINESS_ANALYST",
            ScriptedReply::Text("Happy to help with your positioning!".to_string()),
        );
    }
    let workflow = orchestrator
        .run_workflow(tenant_id, project_id, "owner@example.com")
        .await
        .unwrap();
    assert_eq!(workflow.status, ExecutionStatus::Failed);

    let analyst = execution_for(db, tenant_id, workflow.id, AgentRole::BusinessAnalyst).await;
    assert_eq!(analyst.status, ExecutionStatus::Failed);
    assert_eq!(analyst.metadata.as_ref().unwrap()["errorKind"], "PARSE_ERROR");
    workflow
}

#[tokio::test]
async fn retried_agent_runs_standalone_and_progress_counts_only_completions() {
    let (db, tenant_id, project_id) = setup(1).await;
    let provider = Arc::new(ScriptedProvider::new());
    let orchestrator = orchestrator(&db, &provider);
    let workflow = failed_discovery_run(&db, tenant_id, project_id, &provider, &orchestrator).await;

    // Planner and researcher completed; the analyst failed and the rest
    // were cancelled.
    assert_eq!(workflow.total_steps, 10);
    assert_eq!(workflow.completed_steps, 2);
    assert_eq!(workflow.progress_percentage, 20.0);

    let failed = execution_for(&db, tenant_id, workflow.id, AgentRole::BusinessAnalyst).await;
    let retry = RetryCoordinator::new(db.clone())
        .retry(tenant_id, failed.id, "owner@example.com")
        .await
        .unwrap();

    let finished = orchestrator.run_standalone(tenant_id, retry.id).await.unwrap();
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(finished.output.as_ref().unwrap()["valuePropositions"][0], "Baked fresh every morning");

    let workflow = WorkflowExecution::find_by_id(&db.pool, tenant_id, workflow.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(workflow.status, ExecutionStatus::Failed);
    assert_eq!(workflow.completed_steps, 3);
    assert_eq!(workflow.progress_percentage, 30.0);

    // A finished execution is not run twice.
    assert!(matches!(
        orchestrator.run_standalone(tenant_id, retry.id).await,
        Err(OrchestratorError::Precondition(_))
    ));
}

#[tokio::test]
async fn sweeper_picks_up_orphaned_retries() {
    let (db, tenant_id, project_id) = setup(1).await;
    let provider = Arc::new(ScriptedProvider::new());
    let dyn_provider: Arc<dyn LlmProvider> = provider.clone();
    let orchestrator = Orchestrator::new(
        db.clone(),
        dyn_provider,
        OrchestratorConfig {
            retry_sweep_grace_secs: 0,
            ..fast_config()
        },
    )
    .unwrap();
    let workflow = failed_discovery_run(&db, tenant_id, project_id, &provider, &orchestrator).await;

    let failed = execution_for(&db, tenant_id, workflow.id, AgentRole::BusinessAnalyst).await;
    // Nothing spawns the retry: it sits PENDING as after a restart.
    let retry = RetryCoordinator::new(db.clone())
        .retry(tenant_id, failed.id, "owner@example.com")
        .await
        .unwrap();

    assert_eq!(orchestrator.sweep_pending_retries().await.unwrap(), 1);

    let mut status = ExecutionStatus::Pending;
    for _ in 0..200 {
        status = AgentExecution::find_by_id(&db.pool, tenant_id, retry.id)
            .await
            .unwrap()
            .unwrap()
            .status;
        if status == ExecutionStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(orchestrator.sweep_pending_retries().await.unwrap(), 0);
}
