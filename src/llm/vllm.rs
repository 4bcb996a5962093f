//! vLLM completions backend.
//!
//! Uses the OpenAI-compatible `/v1/completions` endpoint with a raw
//! rendered prompt and explicit stop sequences, which is the fine-grained
//! control the tool-calling loop needs, so this backend reports
//! `supports_tool_loop() == true`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{GenerationBackend, GenerationOutput, GenerationRequest};
use crate::config::LlmConfig;
use crate::conversation::{ChatMessage, Role};

pub struct VllmBackend {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    prompt: String,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl VllmBackend {
    pub fn new(base_url: String, model: String, timeout_secs: u64) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url,
            model,
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
impl GenerationBackend for VllmBackend {
    fn name(&self) -> &str {
        "vllm"
    }

    fn supports_tool_loop(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        self.http_client
            .get(format!("{}/v1/models", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let mut stop = request.stop.clone();
        for marker in [ROLE_USER, ROLE_SYSTEM] {
            if !stop.iter().any(|s| s == marker) {
                stop.push(marker.to_string());
            }
        }

        let body = CompletionRequest {
            model: self.model.clone(),
            prompt: render_prompt(&request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop,
        };

        debug!(model = %self.model, prompt_chars = body.prompt.len(), "vllm completion request");

        let response = self
            .http_client
            .post(format!("{}/v1/completions", self.base_url))
            .json(&body)
            .send()
            .await
            .context("vllm request failed")?
            .error_for_status()
            .context("vllm returned an error status")?;

        let parsed: CompletionResponse = response
            .json()
            .await
            .context("failed to decode vllm response")?;

        let Some(choice) = parsed.choices.into_iter().next() else {
            bail!("vllm returned no completion choices");
        };

        Ok(GenerationOutput {
            text: choice.text,
            finish_reason: choice.finish_reason,
        })
    }
}

const ROLE_SYSTEM: &str = "<|system|>";
const ROLE_DEVELOPER: &str = "<|developer|>";
const ROLE_USER: &str = "<|user|>";
const ROLE_ASSISTANT: &str = "<|assistant|>";

/// Render the conversation into a role-tagged raw prompt ending with an
/// open assistant turn.
fn render_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let tag = match message.role {
            Role::System => ROLE_SYSTEM,
            Role::Developer => ROLE_DEVELOPER,
            Role::User => ROLE_USER,
            Role::Assistant => ROLE_ASSISTANT,
        };
        prompt.push_str(tag);
        prompt.push('\n');
        prompt.push_str(&message.content);
        if let Some(results) = &message.tool_results {
            if let Ok(rendered) = serde_json::to_string(results) {
                prompt.push('\n');
                prompt.push_str("tool_results: ");
                prompt.push_str(&rendered);
            }
        }
        prompt.push('\n');
    }
    prompt.push_str(ROLE_ASSISTANT);
    prompt.push('\n');
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ChatMessage, ToolResult};

    #[test]
    fn prompt_ends_with_open_assistant_turn() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("help")];
        let prompt = render_prompt(&messages);
        assert!(prompt.starts_with("<|system|>\nsys\n"));
        assert!(prompt.contains("<|user|>\nhelp\n"));
        assert!(prompt.ends_with("<|assistant|>\n"));
    }

    #[test]
    fn tool_results_are_rendered_into_the_prompt() {
        let messages = vec![ChatMessage::tool_results(vec![ToolResult {
            call_id: "c1".into(),
            result: serde_json::json!({"status": "success"}),
            error: None,
        }])];
        let prompt = render_prompt(&messages);
        assert!(prompt.contains("tool_results:"));
        assert!(prompt.contains("success"));
    }

    #[test]
    fn backend_reports_tool_loop_support() {
        let backend = VllmBackend::new("http://127.0.0.1:8000".into(), "m".into(), 5);
        assert!(backend.supports_tool_loop());
        assert_eq!(backend.name(), "vllm");
    }
}
