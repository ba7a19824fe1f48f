use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default system prompt handed to every LLM backend unless overridden.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful medical information assistant. \
Provide accurate, evidence-based health information. Always remind users to consult \
healthcare professionals for medical advice.";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub docs: DocsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// Similarity metric fixed at index construction: "cosine" or "dot".
    #[serde(default = "default_metric")]
    pub metric: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            metric: default_metric(),
        }
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("data/index")
}
fn default_metric() -> String {
    "cosine".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Best-score floor below which a knowledge-base result counts as
    /// low-confidence and web fallback may fire. Cosine-space value.
    #[serde(default = "default_web_fallback_threshold")]
    pub web_fallback_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            web_fallback_threshold: default_web_fallback_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_web_fallback_threshold() -> f32 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// One of: hash, openai, ollama, local.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            timeout_secs: default_embed_timeout_secs(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_dimension() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_results: default_max_results(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_max_results() -> usize {
    3
}
fn default_search_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Active backend id: groq, openai, or gemini for the built-in set.
    #[serde(default = "default_gateway_provider")]
    pub provider: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_concise_max_words")]
    pub concise_max_words: usize,
    #[serde(default = "default_detailed_max_words")]
    pub detailed_max_words: usize,
    #[serde(default = "default_complete_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_groq_model")]
    pub groq_model: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: default_gateway_provider(),
            temperature: default_temperature(),
            concise_max_words: default_concise_max_words(),
            detailed_max_words: default_detailed_max_words(),
            timeout_secs: default_complete_timeout_secs(),
            system_prompt: default_system_prompt(),
            groq_model: default_groq_model(),
            openai_model: default_openai_model(),
            gemini_model: default_gemini_model(),
        }
    }
}

fn default_gateway_provider() -> String {
    "groq".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_concise_max_words() -> usize {
    150
}
fn default_detailed_max_words() -> usize {
    500
}
fn default_complete_timeout_secs() -> u64 {
    60
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_groq_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

/// Optional seed corpus ingested when building a fresh index.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DocsConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfiguration(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::InvalidConfiguration(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Config> {
        if path.exists() {
            Config::load(path)
        } else {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Enforce cross-field constraints. Every constructor path runs this
    /// before the config reaches the rest of the engine.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::InvalidConfiguration(
                "chunking.chunk_size must be > 0".to_string(),
            ));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::InvalidConfiguration(format!(
                "chunking.chunk_overlap ({}) must be < chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.retrieval.top_k == 0 {
            return Err(Error::InvalidConfiguration(
                "retrieval.top_k must be >= 1".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.web_fallback_threshold) {
            return Err(Error::InvalidConfiguration(
                "retrieval.web_fallback_threshold must be in [-1.0, 1.0]".to_string(),
            ));
        }
        match self.index.metric.as_str() {
            "cosine" | "dot" => {}
            other => {
                return Err(Error::InvalidConfiguration(format!(
                    "unknown index.metric '{other}'. Must be cosine or dot."
                )));
            }
        }
        match self.embedding.provider.as_str() {
            "hash" | "openai" | "ollama" | "local" => {}
            other => {
                return Err(Error::InvalidConfiguration(format!(
                    "unknown embedding provider '{other}'. Must be hash, openai, ollama, or local."
                )));
            }
        }
        if self.embedding.dimension == 0 {
            return Err(Error::InvalidConfiguration(
                "embedding.dimension must be > 0".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "embedding.batch_size must be > 0".to_string(),
            ));
        }
        if self.web_search.max_results == 0 {
            return Err(Error::InvalidConfiguration(
                "web_search.max_results must be >= 1".to_string(),
            ));
        }
        if self.gateway.provider.is_empty() {
            return Err(Error::InvalidConfiguration(
                "gateway.provider must not be empty".to_string(),
            ));
        }
        if self.gateway.concise_max_words == 0 || self.gateway.detailed_max_words == 0 {
            return Err(Error::InvalidConfiguration(
                "gateway word budgets must be >= 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.gateway.temperature) {
            return Err(Error::InvalidConfiguration(
                "gateway.temperature must be in [0.0, 2.0]".to_string(),
            ));
        }
        Ok(())
    }
}
