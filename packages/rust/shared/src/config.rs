//! Application configuration for HandbookQA.
//!
//! User config lives at `~/.handbookqa/handbookqa.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HandbookQaError, Result};
use crate::types::corpus_fingerprint;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "handbookqa.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".handbookqa";

/// Default vector store database file name.
const DB_FILE_NAME: &str = "handbook.db";

// ---------------------------------------------------------------------------
// Config structs (matching handbookqa.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source document corpus.
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Chunking parameters.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retrieval parameters.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// OpenAI-compatible provider settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Ingestion batch settings.
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// `[corpus]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Source URLs ingested in full on (re)build.
    #[serde(default = "default_corpus_urls")]
    pub urls: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            urls: default_corpus_urls(),
        }
    }
}

fn default_corpus_urls() -> Vec<String> {
    [
        "https://basecamp.com/handbook",
        "https://basecamp.com/handbook/how-we-work",
        "https://basecamp.com/handbook/benefits-and-perks",
        "https://basecamp.com/handbook/work-life-balance",
        "https://basecamp.com/handbook/titles-for-support",
        "https://basecamp.com/handbook/getting-started",
        "https://basecamp.com/handbook/communication",
        "https://basecamp.com/handbook/our-internal-systems",
        "https://basecamp.com/handbook/pricing-and-profit",
        "https://basecamp.com/handbook/dei",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[chunking]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    100
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per question.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Maximum accepted question length in characters.
    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_question_chars: default_max_question_chars(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_max_question_chars() -> usize {
    1000
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Embedding model identifier.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Generation (chat) model identifier.
    #[serde(default = "default_generation_model")]
    pub generation_model: String,

    /// Sampling temperature for answer generation.
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens requested from the generation model.
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Attempts per provider call before surfacing the error.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Maximum texts sent per embeddings request.
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            embedding_model: default_embedding_model(),
            generation_model: default_generation_model(),
            temperature: 0.0,
            max_completion_tokens: default_max_completion_tokens(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            embed_batch_size: default_embed_batch_size(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".into()
}
fn default_generation_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_max_completion_tokens() -> usize {
    400
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> usize {
    3
}
fn default_embed_batch_size() -> usize {
    64
}

/// `[ingest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum concurrent document fetches.
    #[serde(default = "default_ingest_concurrency")]
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_ingest_concurrency(),
        }
    }
}

fn default_ingest_concurrency() -> usize {
    4
}

impl AppConfig {
    /// Fingerprint of the configured document set and chunking parameters.
    ///
    /// A persisted store tagged with a different fingerprint was built from
    /// a different corpus and must not be reused.
    pub fn corpus_fingerprint(&self) -> String {
        corpus_fingerprint(
            &self.openai.embedding_model,
            self.chunking.chunk_size,
            self.chunking.overlap,
            &self.corpus.urls,
        )
    }

    /// Validate cross-field invariants not expressible in serde defaults.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.overlap >= self.chunking.chunk_size {
            return Err(HandbookQaError::config(format!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap, self.chunking.chunk_size
            )));
        }
        if self.corpus.urls.is_empty() {
            return Err(HandbookQaError::config("corpus.urls must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.handbookqa/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| HandbookQaError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.handbookqa/handbookqa.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Default path of the persisted vector store (`~/.handbookqa/handbook.db`).
pub fn default_db_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(DB_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HandbookQaError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        HandbookQaError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HandbookQaError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HandbookQaError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HandbookQaError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the provider API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.openai.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(HandbookQaError::config(format!(
            "provider API key not found. Set the {var_name} environment variable."
        ))),
    }
}
