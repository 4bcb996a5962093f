//! Ollama chat backend.
//!
//! Talks to a local Ollama runtime over its `/api/chat` endpoint. Ollama
//! exposes no raw-prompt or stop-sequence control through the chat API,
//! so this backend reports `supports_tool_loop() == false` and the engine
//! uses the retrieval-augmented single-shot mode with it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{GenerationBackend, GenerationOutput, GenerationRequest};
use crate::config::LlmConfig;
use crate::conversation::Role;

/// Keep the model loaded between requests.
const DEFAULT_KEEP_ALIVE: &str = "5m";

pub struct OllamaBackend {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
    keep_alive: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    keep_alive: String,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f64,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
}

impl OllamaBackend {
    pub fn new(base_url: String, model: String, timeout_secs: u64) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url,
            model,
            keep_alive: DEFAULT_KEEP_ALIVE.to_string(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.model.clone(),
            config.timeout_secs,
        )
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn supports_tool_loop(&self) -> bool {
        false
    }

    async fn is_available(&self) -> bool {
        self.http_client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| Message {
                    role: chat_role(m.role).to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: false,
            keep_alive: self.keep_alive.clone(),
            options: Options {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        debug!(model = %self.model, messages = body.messages.len(), "ollama chat request");

        let response = self
            .http_client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .context("ollama request failed")?
            .error_for_status()
            .context("ollama returned an error status")?;

        let parsed: ChatResponse = response
            .json()
            .await
            .context("failed to decode ollama response")?;

        Ok(GenerationOutput {
            text: parsed.message.content,
            finish_reason: parsed.done_reason,
        })
    }
}

/// Ollama's chat API only knows system/user/assistant; developer
/// messages ride along as system.
fn chat_role(role: Role) -> &'static str {
    match role {
        Role::System | Role::Developer => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn developer_role_maps_to_system() {
        assert_eq!(chat_role(Role::Developer), "system");
        assert_eq!(chat_role(Role::System), "system");
        assert_eq!(chat_role(Role::User), "user");
        assert_eq!(chat_role(Role::Assistant), "assistant");
    }

    #[test]
    fn backend_reports_no_tool_loop_support() {
        let backend = OllamaBackend::new("http://127.0.0.1:11434".into(), "m".into(), 5);
        assert!(!backend.supports_tool_loop());
        assert_eq!(backend.name(), "ollama");
    }
}
