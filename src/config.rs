//! TOML configuration.
//!
//! Every section except `[model]` has defaults, so the smallest useful file
//! is:
//!
//! ```toml
//! [model]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```
//!
//! [`load_config`] parses the file and rejects invalid values up front.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use qms_review_core::chunk::ChunkOptions;
use qms_review_core::StoreLimits;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_true")]
    pub preserve_sections: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            preserve_sections: true,
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkOptions {
        ChunkOptions {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            preserve_sections: self.preserve_sections,
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
    #[serde(default = "default_target_watermark")]
    pub target_watermark: usize,
    #[serde(default = "default_context_passages")]
    pub context_passages: usize,
    #[serde(default = "default_answer_passages")]
    pub answer_passages: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            target_watermark: default_target_watermark(),
            context_passages: default_context_passages(),
            answer_passages: default_answer_passages(),
        }
    }
}

impl RetrievalConfig {
    pub fn limits(&self) -> Result<StoreLimits> {
        Ok(StoreLimits::new(self.max_capacity, self.target_watermark)?)
    }
}

fn default_max_capacity() -> usize {
    StoreLimits::DEFAULT_MAX_CAPACITY
}
fn default_target_watermark() -> usize {
    StoreLimits::DEFAULT_TARGET_WATERMARK
}
fn default_context_passages() -> usize {
    3
}
fn default_answer_passages() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL: Ollama defaults to `http://localhost:11434`, OpenAI to
    /// `https://api.openai.com`.
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
            provider: default_embedding_provider(),
            model: None,
            dims: Some(256),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    fn needs_model(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "ollama")
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Sampling temperature for the reviewers.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_synthesis_temperature")]
    pub synthesis_temperature: f32,
    /// Budget for a single model call.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_temperature() -> f32 {
    0.1
}
fn default_synthesis_temperature() -> f32 {
    0.2
}
fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("./procedures")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HistoryConfig {
    /// JSON-lines file receiving completed reviews. Unset disables history.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    config
        .chunking
        .options()
        .validate()
        .with_context(|| "invalid [chunking] section")?;

    // Retrieval
    config
        .retrieval
        .limits()
        .with_context(|| "invalid [retrieval] section")?;
    if config.retrieval.context_passages < 1 {
        bail!("retrieval.context_passages must be >= 1");
    }
    if config.retrieval.answer_passages < 1 {
        bail!("retrieval.answer_passages must be >= 1");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.needs_model() && config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    // Model
    match config.model.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown model provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.model.is_enabled() && config.model.model.is_none() {
        bail!(
            "model.model must be specified when provider is '{}'",
            config.model.provider
        );
    }
    if config.model.timeout_ms == 0 {
        bail!("model.timeout_ms must be > 0");
    }
    for (name, value) in [
        ("temperature", config.model.temperature),
        ("synthesis_temperature", config.model.synthesis_temperature),
    ] {
        if !(0.0..=2.0).contains(&value) {
            bail!("model.{} must be in [0.0, 2.0]", name);
        }
    }

    Ok(())
}
