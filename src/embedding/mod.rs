//! Embedding backends and vector utilities.
//!
//! Passages and questions are turned into vectors by an
//! [`EmbeddingProvider`], chosen by `[embedding].provider`:
//! - `openai`: [`OpenAIProvider`], any OpenAI-compatible `/embeddings` endpoint.
//! - `ollama`: [`OllamaProvider`], a local Ollama instance's `/api/embed`.
//! - `local` (default): `LocalProvider`, fastembed running in-process.
//!
//! The two remote providers retry through [`crate::http`].
//!
//! The helpers at the bottom of this module are what the retrieval index
//! stores and searches with: [`vec_to_blob`] / [`blob_to_vec`] for the
//! little-endian `f32` layout of `vectors.bin`, and [`cosine_similarity`].

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::{Credentials, EmbeddingConfig};
use crate::http::post_json_with_retry;

/// A text embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, recorded in the index manifest.
    fn model_name(&self) -> &str;
    /// Length of every vector this provider returns.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed any number of texts in batches of `batch_size`.
///
/// # Errors
///
/// Fails if a batch fails, or if the provider returns the wrong number of
/// vectors or vectors of the wrong dimensionality.
pub async fn embed_all(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let out = provider.embed(batch).await?;
        if out.len() != batch.len() {
            bail!(
                "embedding provider returned {} vectors for {} inputs",
                out.len(),
                batch.len()
            );
        }
        if let Some(bad) = out.iter().find(|v| v.len() != provider.dims()) {
            bail!(
                "embedding provider returned {} dims, expected {}",
                bad.len(),
                provider.dims()
            );
        }
        debug!(batch = batch.len(), done = vectors.len() + out.len(), "embedded batch");
        vectors.extend(out);
    }
    Ok(vectors)
}

/// Embed one question.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let mut out = provider.embed(&[text.to_string()]).await?;
    if out.len() != 1 {
        bail!("embedding provider returned {} vectors for one query", out.len());
    }
    Ok(out.remove(0))
}

/// `model` and `dims` for a remote provider, which has no defaults.
fn remote_model(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model = config.model.clone().with_context(|| {
        format!("embedding.model is required for the {} provider", config.provider)
    })?;
    let dims = config.dims.filter(|d| *d > 0).with_context(|| {
        format!("embedding.dims is required for the {} provider", config.provider)
    })?;
    Ok((model, dims))
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

// ============ OpenAI ============

/// OpenAI (or compatible) embeddings endpoint.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    endpoint: String,
    max_retries: u32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Fails if `embedding.model` or `embedding.dims` is unset, or if
    /// `OPENAI_API_KEY` was not provided.
    pub fn new(config: &EmbeddingConfig, credentials: &Credentials) -> Result<Self> {
        let (model, dims) = remote_model(config)?;
        let base = config
            .url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/');
        Ok(Self {
            model,
            dims,
            endpoint: format!("{}/embeddings", base),
            max_retries: config.max_retries,
            api_key: credentials.require_openai_key()?.to_string(),
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry("OpenAI embeddings", self.max_retries, || {
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        parse_openai_response(&json)
    }
}

/// `data[].embedding`, put back in input order by each item's `index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("embeddings response has no `data` array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let vector = item
            .get("embedding")
            .map(floats)
            .transpose()?
            .ok_or_else(|| anyhow!("embeddings response item {} has no vector", pos))?;
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map_or(pos, |i| i as usize);
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// A JSON array of numbers as `f32`s.
fn floats(value: &Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("embedding is not an array"))?
        .iter()
        .map(|n| {
            n.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("embedding holds a non-number: {}", n))
        })
        .collect()
}

// ============ Ollama ============

/// Ollama embeddings (default `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = remote_model(config)?;
        let url = config
            .url
            .as_deref()
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let endpoint = format!("{}/api/embed", self.url);
        let service = format!("Ollama at {}", self.url);
        let json = post_json_with_retry(&service, self.max_retries, || {
            self.client.post(&endpoint).json(&body)
        })
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Ollama response has no `embeddings` array"))?
        .iter()
        .map(floats)
        .collect()
}

// ============ Local (fastembed) ============

/// In-process embeddings via fastembed.
///
/// The model is fetched from Hugging Face the first time `embed` runs and
/// then kept loaded for the life of the provider.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    loaded: std::sync::Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let (model, known_dims) = local_model(&name).with_context(|| {
            format!(
                "unknown local embedding model '{}'; use one of: {}",
                name,
                LOCAL_MODELS.join(", ")
            )
        })?;
        Ok(Self {
            name,
            model,
            dims: config.dims.unwrap_or(known_dims),
            batch_size: config.batch_size,
            loaded: Default::default(),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
const DEFAULT_LOCAL_MODEL: &str = "bge-small-en-v1.5";

#[cfg(feature = "local-embeddings-fastembed")]
const LOCAL_MODELS: &[&str] = &[
    "all-minilm-l6-v2",
    "bge-small-en-v1.5",
    "bge-base-en-v1.5",
    "nomic-embed-text-v1.5",
];

#[cfg(feature = "local-embeddings-fastembed")]
fn local_model(name: &str) -> Option<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    match name {
        "all-minilm-l6-v2" => Some((M::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Some((M::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Some((M::BGEBaseENV15, 768)),
        "nomic-embed-text-v1.5" => Some((M::NomicEmbedTextV15, 768)),
        _ => None,
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let loaded = self.loaded.clone();
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut slot = loaded
                .lock()
                .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
            if slot.is_none() {
                let options = fastembed::InitOptions::new(model).with_show_download_progress(true);
                let engine = fastembed::TextEmbedding::try_new(options)
                    .map_err(|e| anyhow!("failed to load local embedding model: {}", e))?;
                *slot = Some(engine);
            }
            match slot.as_mut() {
                Some(engine) => engine
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("local embedding failed: {}", e)),
                None => bail!("local embedding model not loaded"),
            }
        })
        .await?
    }
}

/// Build the provider named by `embedding.provider`.
pub fn create_provider(
    config: &EmbeddingConfig,
    credentials: &Credentials,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIProvider::new(config, credentials)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("the local embedding provider needs the `local-embeddings-fastembed` feature"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Vector helpers ============

/// Little-endian `f32` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. A trailing partial value is ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, mismatched, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let denom = aa.sqrt() * bb.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}
