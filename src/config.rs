use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Character cap for leaf chunks; longer leaves are split into ordered
    /// detail children.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    /// Character cap for the computed summary of non-leaf chunks.
    #[serde(default = "default_summary_max_chars")]
    pub summary_max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            summary_max_chars: default_summary_max_chars(),
        }
    }
}

fn default_max_chunk_chars() -> usize {
    800
}
fn default_summary_max_chars() -> usize {
    240
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_summary_k")]
    pub summary_k: usize,
    #[serde(default = "default_details_per_summary")]
    pub details_per_summary: usize,
    #[serde(default = "default_content_max_length")]
    pub content_max_length: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            summary_k: default_summary_k(),
            details_per_summary: default_details_per_summary(),
            content_max_length: default_content_max_length(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_summary_k() -> usize {
    3
}
fn default_details_per_summary() -> usize {
    3
}
fn default_content_max_length() -> usize {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"`, `"ollama"`, or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// System-wide embedding dimension; every stored vector is asserted
    /// against this value.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Endpoint override (Ollama URL or an OpenAI-compatible base).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::InvalidInput(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| RagError::InvalidInput(format!("failed to parse config file: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chunk_chars == 0 {
        return Err(RagError::InvalidInput(
            "chunking.max_chunk_chars must be > 0".to_string(),
        ));
    }
    if config.chunking.summary_max_chars == 0 {
        return Err(RagError::InvalidInput(
            "chunking.summary_max_chars must be > 0".to_string(),
        ));
    }

    if !(1..=50).contains(&config.retrieval.top_k) {
        return Err(RagError::InvalidInput(
            "retrieval.top_k must be in 1..=50".to_string(),
        ));
    }
    if !(100..=2000).contains(&config.retrieval.content_max_length) {
        return Err(RagError::InvalidInput(
            "retrieval.content_max_length must be in 100..=2000".to_string(),
        ));
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => {
            return Err(RagError::InvalidInput(format!(
                "unknown embedding provider: '{}' (disabled, openai, ollama)",
                other
            )));
        }
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            return Err(RagError::InvalidInput(format!(
                "embedding.model must be set when provider is '{}'",
                config.embedding.provider
            )));
        }
        match config.embedding.dims {
            None | Some(0) => {
                return Err(RagError::InvalidInput(format!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                )));
            }
            Some(_) => {}
        }
    }

    Ok(())
}
