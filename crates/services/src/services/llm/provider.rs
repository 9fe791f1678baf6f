//! Provider trait and common types for LLM completions

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Rate limited: retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Authentication failed: {0}")]
    AuthError(String),
}

impl ProviderError {
    /// Transient failures worth another attempt. Client errors other than
    /// 408 and 429 will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RequestFailed(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::MalformedResponse(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500 || *status == 408,
            ProviderError::ConfigError(_) | ProviderError::AuthError(_) => false,
        }
    }
}

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    /// Falls back to the provider's configured model.
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: vec![ChatMessage::user(user_prompt)],
            model: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// One block of a provider reply. Only text is consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Other,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderContent {
    pub parts: Vec<ContentPart>,
}

impl ProviderContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// All text parts joined in order.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: CompletionRequest) -> Result<ProviderContent, ProviderError>;
}
