//! TOML configuration and process credentials.
//!
//! A [`Config`] is parsed once at startup by [`load_config`] and handed to
//! every component by reference. Secrets never live in the config file;
//! they are read from the environment exactly once into [`Credentials`].
//!
//! # Example
//!
//! ```toml
//! [canvas]
//! base_url = "https://canvas.instructure.com/api/v1"
//! enrolled_courses = ["Geology", "Elementary French I Online"]
//!
//! [storage]
//! bucket = "canvas-files-autodoc"
//! region = "us-east-2"
//!
//! [llm]
//! model = "gpt-4o-mini"
//!
//! [chunking]
//! max_tokens = 180
//!
//! [embedding]
//! provider = "local"
//! model = "bge-small-en-v1.5"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub canvas: CanvasConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub parsing: ParsingConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CanvasConfig {
    #[serde(default = "default_canvas_url")]
    pub base_url: String,
    /// Course display names to ingest. Courses not listed here are ignored.
    pub enrolled_courses: Vec<String>,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_canvas_url() -> String {
    "https://canvas.instructure.com/api/v1".to_string()
}
fn default_per_page() -> u32 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Stored keys matching these globs are never indexed.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParsingConfig {
    #[serde(default = "default_parse_url")]
    pub base_url: String,
    #[serde(default = "default_result_type")]
    pub result_type: String,
    #[serde(default)]
    pub premium_mode: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            base_url: default_parse_url(),
            result_type: default_result_type(),
            premium_mode: false,
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_parse_url() -> String {
    "https://api.cloud.llamaindex.ai/api/parsing".to_string()
}
fn default_result_type() -> String {
    "markdown".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_max_polls() -> u32 {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override for the openai and ollama providers.
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
    "local".to_string()
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
pub struct IndexConfig {
    #[serde(default = "default_index_name")]
    pub name: String,
    /// Object-store prefix the index directory is mirrored under.
    #[serde(default = "default_remote_prefix")]
    pub remote_prefix: String,
    /// Parent of the local index directory, relative to the working directory.
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            remote_prefix: default_remote_prefix(),
            local_root: default_local_root(),
        }
    }
}

impl IndexConfig {
    /// Local directory holding the named index.
    pub fn local_dir(&self) -> PathBuf {
        self.local_root.join(&self.name)
    }
}

fn default_index_name() -> String {
    "s3-rag-index".to_string()
}
fn default_remote_prefix() -> String {
    "rag-index".to_string()
}
fn default_local_root() -> PathBuf {
    PathBuf::from(".course-harness/dense/indexes")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    8
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
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.canvas.enrolled_courses.is_empty() {
        bail!("canvas.enrolled_courses must list at least one course");
    }

    if config.storage.bucket.trim().is_empty() {
        bail!("storage.bucket must not be empty");
    }

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    let prefix = config.index.remote_prefix.trim_matches('/');
    if prefix.is_empty() {
        bail!("index.remote_prefix must not be empty");
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
            other
        ),
    }

    if config.llm.provider != "openai" {
        bail!(
            "Unknown llm provider: '{}'. Only openai is supported.",
            config.llm.provider
        );
    }

    Ok(())
}

// ============ Credentials ============

/// Secrets read from the environment once at process start.
///
/// Each field is optional here; components that need one call the
/// matching `require_*` accessor, which fails with the variable name.
#[derive(Clone, Default)]
pub struct Credentials {
    pub canvas_token: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_session_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub llama_cloud_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("canvas_token", &self.canvas_token.is_some())
            .field("aws_access_key_id", &self.aws_access_key_id.is_some())
            .field("openai_api_key", &self.openai_api_key.is_some())
            .field("llama_cloud_api_key", &self.llama_cloud_api_key.is_some())
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            canvas_token: var("CANVAS_API_TOKEN"),
            aws_access_key_id: var("AWS_ACCESS_KEY_ID"),
            aws_secret_access_key: var("AWS_SECRET_ACCESS_KEY"),
            aws_session_token: var("AWS_SESSION_TOKEN"),
            openai_api_key: var("OPENAI_API_KEY"),
            llama_cloud_api_key: var("LLAMA_CLOUD_API_KEY"),
        }
    }

    pub fn require_canvas_token(&self) -> Result<&str> {
        require(&self.canvas_token, "CANVAS_API_TOKEN")
    }

    pub fn require_openai_key(&self) -> Result<&str> {
        require(&self.openai_api_key, "OPENAI_API_KEY")
    }

    pub fn require_llama_cloud_key(&self) -> Result<&str> {
        require(&self.llama_cloud_api_key, "LLAMA_CLOUD_API_KEY")
    }

    pub fn require_aws(&self) -> Result<(&str, &str)> {
        Ok((
            require(&self.aws_access_key_id, "AWS_ACCESS_KEY_ID")?,
            require(&self.aws_secret_access_key, "AWS_SECRET_ACCESS_KEY")?,
        ))
    }
}

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .with_context(|| format!("{} environment variable not set", name))
}
