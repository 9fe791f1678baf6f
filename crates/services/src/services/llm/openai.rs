//! OpenAI-compatible chat completions provider

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::provider::{
    CompletionRequest, ContentPart, LlmProvider, MessageRole, ProviderContent, ProviderError,
};
use crate::services::config::LlmConfig;

pub struct OpenAiCompatibleProvider {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::ConfigError(e.to_string()))?;

        if config.api_key.is_none() {
            tracing::warn!("LLM provider created without API key - LLM_API_KEY not set");
        }

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn payload(&self, request: &CompletionRequest) -> Value {
        let mut messages = vec![json!({"role": "system", "content": request.system_prompt})];
        messages.extend(request.messages.iter().map(|m| {
            let role = match m.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            };
            json!({"role": role, "content": m.content})
        }));

        json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "temperature": request.temperature.unwrap_or(self.temperature),
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "messages": messages,
        })
    }
}

/// `choices[0].message.content` is either a string or a list of typed parts.
fn parse_response(json: &Value) -> Result<ProviderContent, ProviderError> {
    let content = &json["choices"][0]["message"]["content"];

    match content {
        Value::String(text) => Ok(ProviderContent::text(text.clone())),
        Value::Array(parts) => Ok(ProviderContent {
            parts: parts
                .iter()
                .map(|part| match (part["type"].as_str(), part["text"].as_str()) {
                    (Some("text"), Some(text)) => ContentPart::Text {
                        text: text.to_string(),
                    },
                    _ => ContentPart::Other,
                })
                .collect(),
        }),
        _ => Err(ProviderError::MalformedResponse(
            "response has no message content".to_string(),
        )),
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &'static str {
        "openai-compatible"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<ProviderContent, ProviderError> {
        let auth_header = self
            .api_key
            .as_ref()
            .map(|k| format!("Bearer {}", k))
            .ok_or_else(|| ProviderError::AuthError("No LLM API key configured".to_string()))?;

        let payload = self.payload(&request);
        tracing::debug!(
            "[LLM] Sending request: model={}, messages={}",
            payload["model"],
            request.messages.len() + 1
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", auth_header)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                let retry_after_ms = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(|secs| secs * 1000);
                return Err(ProviderError::RateLimited { retry_after_ms });
            }
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(ProviderError::AuthError(format!("status {}", status)));
            }

            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        parse_response(&json)
    }
}
