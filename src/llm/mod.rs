//! Generation backend abstraction.
//!
//! Backends are capability-tagged: `supports_tool_loop()` reports whether
//! the backend gives fine-grained generation control (raw prompt + stop
//! sequences), which is what the orchestration engine needs to run the
//! bounded tool-calling loop. Text-only chat backends work too; the
//! engine drops to the retrieval-augmented single-shot mode for them.
//!
//! The factory probes availability at construction time, so a missing
//! local runtime degrades the system to template-only operation instead
//! of failing every request later.

pub mod ollama;
pub mod vllm;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::LlmConfig;
use crate::conversation::ChatMessage;

/// A rendered generation request, backend-agnostic.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Stop sequences; honored only by backends with fine-grained control.
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOutput {
    pub text: String,
    pub finish_reason: Option<String>,
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this backend supports fine-grained generation control.
    /// True selects the tool-calling loop; false selects the
    /// retrieval-augmented single-shot fallback.
    fn supports_tool_loop(&self) -> bool;

    /// Probe whether the backing runtime is reachable.
    async fn is_available(&self) -> bool;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput>;
}

/// Create the configured backend, probing availability. Returns `None`
/// when the provider is disabled or nothing answers the probe; callers
/// treat that as degraded, template-only operation.
pub async fn create_backend(config: &LlmConfig) -> Option<Arc<dyn GenerationBackend>> {
    let candidates: Vec<Arc<dyn GenerationBackend>> = match config.provider.as_str() {
        "disabled" => return None,
        "vllm" => vec![Arc::new(vllm::VllmBackend::from_config(config))],
        "ollama" => vec![Arc::new(ollama::OllamaBackend::from_config(config))],
        // auto: prefer the backend with fine-grained control
        _ => vec![
            Arc::new(vllm::VllmBackend::from_config(config)),
            Arc::new(ollama::OllamaBackend::from_config(config)),
        ],
    };

    for backend in candidates {
        if backend.is_available().await {
            info!(backend = backend.name(), "generation backend ready");
            return Some(backend);
        }
        warn!(backend = backend.name(), "generation backend unavailable");
    }

    warn!("no generation backend available, running in template-only mode");
    None
}
