use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::services::llm::ProviderError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid agent input: {0}")]
    Validation(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Could not parse agent output: {0}")]
    Parse(String),
    #[error("Business rule violated: {0}")]
    BusinessRule(String),
    #[error("Agent timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Classification stored on failed executions under `metadata.errorKind`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ValidationError,
    ProviderError,
    ParseError,
    BusinessRuleError,
    TimeoutError,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Validation(_) => ErrorKind::ValidationError,
            AgentError::Provider(_) => ErrorKind::ProviderError,
            AgentError::Parse(_) => ErrorKind::ParseError,
            AgentError::BusinessRule(_) => ErrorKind::BusinessRuleError,
            AgentError::Timeout(_) => ErrorKind::TimeoutError,
        }
    }

    /// Only transient provider failures are retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Provider(e) if e.is_transient())
    }
}
