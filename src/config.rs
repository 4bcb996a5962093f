use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub policy: PolicyFileConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_respect_sentences")]
    pub respect_sentences: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_size: default_overlap_size(),
            min_chunk_size: default_min_chunk_size(),
            respect_sentences: default_respect_sentences(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap_size() -> usize {
    200
}
fn default_min_chunk_size() -> usize {
    100
}
fn default_respect_sentences() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Results returned by the search tool when the model does not ask
    /// for a specific `k`.
    #[serde(default = "default_search_k")]
    pub search_k: i64,
    /// Characters added on each side of a hit when the fallback mode
    /// widens context via `open`.
    #[serde(default = "default_context_widening")]
    pub context_widening: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_k: default_search_k(),
            context_widening: default_context_widening(),
        }
    }
}

fn default_search_k() -> i64 {
    5
}
fn default_context_widening() -> i64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Backend to use: "auto", "vllm", "ollama", or "disabled".
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// When the fallback mode prefers the canned emergency template over
    /// live generation: "never", "on_error", or "always".
    #[serde(default = "default_template_fallback")]
    pub template_fallback: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            max_iterations: default_max_iterations(),
            max_history: default_max_history(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            template_fallback: default_template_fallback(),
        }
    }
}

fn default_provider() -> String {
    "auto".to_string()
}
fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_model() -> String {
    "gpt-oss:20b".to_string()
}
fn default_max_iterations() -> usize {
    5
}
fn default_max_history() -> usize {
    20
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_temperature() -> f64 {
    0.1
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_template_fallback() -> String {
    "on_error".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PolicyFileConfig {
    /// Optional markdown policy file whose keyword sections are unioned
    /// with the built-in defaults at startup.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.min_chunk_size == 0 {
        anyhow::bail!("chunking.min_chunk_size must be > 0");
    }

    if config.retrieval.search_k < 1 {
        anyhow::bail!("retrieval.search_k must be >= 1");
    }
    if config.retrieval.context_widening < 0 {
        anyhow::bail!("retrieval.context_widening must be >= 0");
    }

    if config.llm.max_iterations == 0 {
        anyhow::bail!("llm.max_iterations must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    match config.llm.provider.as_str() {
        "auto" | "vllm" | "ollama" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be auto, vllm, ollama, or disabled.",
            other
        ),
    }

    match config.llm.template_fallback.as_str() {
        "never" | "on_error" | "always" => {}
        other => anyhow::bail!(
            "Unknown llm.template_fallback: '{}'. Must be never, on_error, or always.",
            other
        ),
    }

    Ok(config)
}
