use std::sync::Arc;

use async_trait::async_trait;
use db::DBService;
use deployment::{Deployment, DeploymentError};
use services::services::{
    config::{Config, load_config_from_file, save_config_to_file},
    discovery_chat::DiscoveryChat,
    llm::{LlmProvider, OpenAiCompatibleProvider},
    orchestrator::Orchestrator,
    progress::ProgressPublisher,
    retry::RetryCoordinator,
};
use tokio::sync::RwLock;
use utils::assets::config_path;

#[derive(Clone)]
pub struct LocalDeployment {
    config: Arc<RwLock<Config>>,
    db: DBService,
    orchestrator: Orchestrator,
    retries: RetryCoordinator,
    progress: ProgressPublisher,
    discovery: DiscoveryChat,
}

impl LocalDeployment {
    /// Wires every service around one database and one model provider.
    pub fn from_parts(
        config: Config,
        db: DBService,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Self, DeploymentError> {
        let orchestrator =
            Orchestrator::new(db.clone(), provider.clone(), config.orchestrator.clone())?;
        let retries = RetryCoordinator::new(db.clone());
        let progress = ProgressPublisher::new(db.clone(), config.progress.poll_interval());
        let discovery = DiscoveryChat::new(db.clone(), provider);

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            db,
            orchestrator,
            retries,
            progress,
            discovery,
        })
    }
}

#[async_trait]
impl Deployment for LocalDeployment {
    async fn new() -> Result<Self, DeploymentError> {
        let config = load_config_from_file(&config_path()).await;

        // Always save config (may have been migrated)
        save_config_to_file(&config, &config_path()).await?;

        let db = DBService::new().await?;
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatibleProvider::new(&config.llm)?);
        tracing::info!(
            "Using model {} at {} (pass score {:.2})",
            config.llm.model,
            config.llm.base_url,
            config.orchestrator.pass_score
        );

        Self::from_parts(config, db, provider)
    }

    fn config(&self) -> &Arc<RwLock<Config>> {
        &self.config
    }

    fn db(&self) -> &DBService {
        &self.db
    }

    fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn retries(&self) -> &RetryCoordinator {
        &self.retries
    }

    fn progress(&self) -> &ProgressPublisher {
        &self.progress
    }

    fn discovery(&self) -> &DiscoveryChat {
        &self.discovery
    }
}
