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
    pub storage: StorageConfig,
    #[serde(default)]
    pub bedrock: BedrockConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    2000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Chunks retrieved for a conversational answer.
    #[serde(default = "default_answer_top_k")]
    pub answer_top_k: i64,
    /// Chunks retrieved as deck-generation context.
    #[serde(default = "default_deck_top_k")]
    pub deck_top_k: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            answer_top_k: default_answer_top_k(),
            deck_top_k: default_deck_top_k(),
        }
    }
}

fn default_answer_top_k() -> i64 {
    5
}
fn default_deck_top_k() -> i64 {
    10
}

/// S3-compatible object store holding raw uploads and generated artifacts.
///
/// Credentials come from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`
/// (and optionally `AWS_SESSION_TOKEN`), never from this file.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_uploads_bucket")]
    pub uploads_bucket: String,
    #[serde(default = "default_artifacts_bucket")]
    pub artifacts_bucket: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_uploads_bucket() -> String {
    "uploads".to_string()
}
fn default_artifacts_bucket() -> String {
    "artifacts".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BedrockConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_text_model_id")]
    pub text_model_id: String,
    #[serde(default = "default_embed_model_id")]
    pub embed_model_id: String,
    /// Embedding vector dimensionality requested from the provider.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            text_model_id: default_text_model_id(),
            embed_model_id: default_embed_model_id(),
            dims: default_dims(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_text_model_id() -> String {
    "us.anthropic.claude-opus-4-0-20250514".to_string()
}
fn default_embed_model_id() -> String {
    "amazon.titan-embed-text-v2:0".to_string()
}
fn default_dims() -> usize {
    1024
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

/// Worker-side retry budgets. Countdowns are configurable so tests can
/// run with zero delay.
#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    #[serde(default = "default_ingest_max_attempts")]
    pub ingest_max_attempts: u32,
    #[serde(default = "default_ingest_countdown_secs")]
    pub ingest_countdown_secs: u64,
    #[serde(default = "default_deck_max_attempts")]
    pub deck_max_attempts: u32,
    #[serde(default = "default_deck_countdown_secs")]
    pub deck_countdown_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            ingest_max_attempts: default_ingest_max_attempts(),
            ingest_countdown_secs: default_ingest_countdown_secs(),
            deck_max_attempts: default_deck_max_attempts(),
            deck_countdown_secs: default_deck_countdown_secs(),
        }
    }
}

fn default_ingest_max_attempts() -> u32 {
    3
}
fn default_ingest_countdown_secs() -> u64 {
    30
}
fn default_deck_max_attempts() -> u32 {
    2
}
fn default_deck_countdown_secs() -> u64 {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
    }
    if config.retrieval.answer_top_k < 1 || config.retrieval.deck_top_k < 1 {
        anyhow::bail!("retrieval top_k values must be >= 1");
    }
    if config.bedrock.dims == 0 {
        anyhow::bail!("bedrock.dims must be > 0");
    }
    if config.jobs.ingest_max_attempts == 0 || config.jobs.deck_max_attempts == 0 {
        anyhow::bail!("job attempt budgets must be >= 1");
    }

    Ok(config)
}
