use std::{path::PathBuf, time::Duration};

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

pub const CONFIG_VERSION: &str = "v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Which layers a refinement iteration re-runs before QUALITY.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefinementScope {
    Code,
    DesignAndCode,
}

#[derive(Clone, Debug, Serialize, Deserialize, TS)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: 0.4,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, TS)]
pub struct OrchestratorConfig {
    /// Composite quality score a workflow needs to complete.
    pub pass_score: f64,
    /// Retries after the first attempt for provider failures.
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f32,
    pub retry_max_delay_ms: u64,
    pub standard_timeout_secs: u64,
    pub code_timeout_secs: u64,
    pub refinement_scope: RefinementScope,
    pub retry_sweep_interval_secs: u64,
    pub retry_sweep_grace_secs: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pass_score: 0.70,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_multiplier: 2.0,
            retry_max_delay_ms: 30_000,
            standard_timeout_secs: 5 * 60,
            code_timeout_secs: 30 * 60,
            refinement_scope: RefinementScope::Code,
            retry_sweep_interval_secs: 30,
            retry_sweep_grace_secs: 30,
        }
    }
}

impl OrchestratorConfig {
    /// Delay before retry `n` is `base * multiplier^n`, capped and jittered.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_factor(self.retry_multiplier)
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
            .with_max_times(self.max_retries)
            .with_jitter()
    }

    pub fn standard_timeout(&self) -> Duration {
        Duration::from_secs(self.standard_timeout_secs)
    }

    pub fn code_timeout(&self) -> Duration {
        Duration::from_secs(self.code_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, TS)]
pub struct ProgressConfig {
    pub poll_interval_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
        }
    }
}

impl ProgressConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, TS)]
pub struct Config {
    pub config_version: String,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION.to_string(),
            llm: LlmConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

impl From<String> for Config {
    fn from(raw_config: String) -> Self {
        match serde_json::from_str::<Config>(&raw_config) {
            Ok(config) if config.config_version == CONFIG_VERSION => config,
            Ok(config) => {
                tracing::warn!(
                    "Unsupported config version {}, using default",
                    config.config_version
                );
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Config parse failed: {}, using default", e);
                Self::default()
            }
        }
    }
}

impl Config {
    /// Environment variables win over the file. Unparseable values are
    /// ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("LLM_API_KEY")
            && !key.trim().is_empty()
        {
            self.llm.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(score) = parse_env::<f64>("PASS_SCORE") {
            if (0.0..=1.0).contains(&score) {
                self.orchestrator.pass_score = score;
            } else {
                tracing::warn!("PASS_SCORE {} outside [0, 1], ignoring", score);
            }
        }
        if let Some(retries) = parse_env::<usize>("MAX_RETRIES") {
            self.orchestrator.max_retries = retries;
        }
        if let Some(interval) = parse_env::<u64>("PROGRESS_POLL_INTERVAL_MS") {
            self.progress.poll_interval_ms = interval.max(100);
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={}", name, raw);
            None
        }
    }
}

/// Reads the config file, falling back to defaults when it is missing or
/// invalid, then applies environment overrides.
pub async fn load_config_from_file(config_path: &PathBuf) -> Config {
    let mut config = match tokio::fs::read_to_string(config_path).await {
        Ok(raw_config) => Config::from(raw_config),
        Err(_) => {
            tracing::info!("No config file found, creating one");
            Config::default()
        }
    };
    config.apply_env_overrides();
    config
}

/// Writes the config without environment overrides leaking a secret that
/// only lives in the environment.
pub async fn save_config_to_file(config: &Config, config_path: &PathBuf) -> Result<(), ConfigError> {
    let mut persisted = config.clone();
    if std::env::var("LLM_API_KEY").is_ok() {
        persisted.llm.api_key = None;
    }
    let raw_config = serde_json::to_string_pretty(&persisted)?;
    tokio::fs::write(config_path, raw_config).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_orchestration_constants() {
        let config = Config::default();
        assert_eq!(config.orchestrator.pass_score, 0.70);
        assert_eq!(config.orchestrator.standard_timeout(), Duration::from_secs(300));
        assert_eq!(config.orchestrator.code_timeout(), Duration::from_secs(1800));
        assert_eq!(config.progress.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.orchestrator.refinement_scope, RefinementScope::Code);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config = Config::from(
            r#"{"config_version":"v1","orchestrator":{"pass_score":0.8,"max_retries":1,
                "retry_base_delay_ms":5,"retry_multiplier":2.0,"retry_max_delay_ms":50,
                "standard_timeout_secs":10,"code_timeout_secs":20,
                "refinement_scope":"DESIGN_AND_CODE","retry_sweep_interval_secs":5,
                "retry_sweep_grace_secs":5}}"#
                .to_string(),
        );
        assert_eq!(config.orchestrator.pass_score, 0.8);
        assert_eq!(
            config.orchestrator.refinement_scope,
            RefinementScope::DesignAndCode
        );
        assert_eq!(config.progress.poll_interval_ms, 2_000);
        assert_eq!(config.llm.model, LlmConfig::default().model);
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let config = Config::from("not json".to_string());
        assert_eq!(config.config_version, CONFIG_VERSION);
        let config = Config::from(r#"{"config_version":"v0"}"#.to_string());
        assert_eq!(config.orchestrator.max_retries, 3);
    }

    #[tokio::test]
    async fn save_then_load_keeps_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.orchestrator.max_retries = 5;
        save_config_to_file(&config, &path).await.unwrap();

        let loaded = load_config_from_file(&path).await;
        assert_eq!(loaded.orchestrator.max_retries, 5);
    }
}
