//! Deterministic provider that replays queued replies. Used by tests and
//! offline runs where no model endpoint is reachable.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;

use super::provider::{CompletionRequest, LlmProvider, ProviderContent, ProviderError};

/// Line every agent system prompt carries; replies are routed by it.
pub fn role_marker(role: &str) -> String {
    format!("Agent role: {}\n", role)
}

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Parts(Vec<String>),
    RateLimited,
    ServerError,
    /// Sleeps before answering with the inner reply.
    Delayed(Duration, Box<ScriptedReply>),
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub marker: Option<String>,
    pub system_prompt: String,
    pub user_prompt: String,
}

#[derive(Default)]
struct Script {
    queued: VecDeque<ScriptedReply>,
    fallback: Option<ScriptedReply>,
}

#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a one-shot reply for prompts carrying `marker`.
    pub fn push(&self, marker: &str, reply: ScriptedReply) -> &Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(marker.to_string())
                .or_default()
                .queued
                .push_back(reply);
        }
        self
    }

    /// Reply used once the queue for `marker` is drained.
    pub fn always(&self, marker: &str, reply: ScriptedReply) -> &Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(marker.to_string()).or_default().fallback = Some(reply);
        }
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, marker: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.marker.as_deref() == Some(marker))
            .collect()
    }

    fn next_reply(&self, request: &CompletionRequest) -> (Option<String>, Option<ScriptedReply>) {
        let Ok(mut scripts) = self.scripts.lock() else {
            return (None, None);
        };
        let Some((marker, script)) = scripts
            .iter_mut()
            .filter(|(marker, _)| request.system_prompt.contains(&role_marker(marker)))
            .max_by_key(|(marker, _)| marker.len())
        else {
            return (None, None);
        };
        let reply = script.queued.pop_front().or_else(|| script.fallback.clone());
        (Some(marker.clone()), reply)
    }
}

async fn resolve(reply: ScriptedReply) -> Result<ProviderContent, ProviderError> {
    let mut reply = reply;
    loop {
        match reply {
            ScriptedReply::Text(text) => return Ok(ProviderContent::text(text)),
            ScriptedReply::Parts(parts) => {
                return Ok(ProviderContent {
                    parts: parts
                        .into_iter()
                        .map(|text| super::provider::ContentPart::Text { text })
                        .collect(),
                });
            }
            ScriptedReply::RateLimited => {
                return Err(ProviderError::RateLimited {
                    retry_after_ms: None,
                });
            }
            ScriptedReply::ServerError => {
                return Err(ProviderError::ApiError {
                    status: 503,
                    message: "scripted outage".to_string(),
                });
            }
            ScriptedReply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<ProviderContent, ProviderError> {
        let (marker, reply) = self.next_reply(&request);

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                marker: marker.clone(),
                system_prompt: request.system_prompt.clone(),
                user_prompt: request.user_prompt().to_string(),
            });
        }

        match reply {
            Some(reply) => resolve(reply).await,
            None => Err(ProviderError::ConfigError(format!(
                "no scripted reply for {}",
                marker.as_deref().unwrap_or("unmatched prompt")
            ))),
        }
    }
}
