//! Selective parsing: route each stored file to the right text extractor.
//!
//! Files the classifier marked as important (syllabi and schedules) go
//! through a high-fidelity, layout-aware [`LayoutParser`]; everything else
//! goes through the plain [`TextLoader`]. Both produce the same
//! [`ExtractedDocument`] shape, so nothing downstream knows which path a
//! document took.
//!
//! # Scoped temporary files
//!
//! The layout parser works on a local file. The object is downloaded into
//! a [`tempfile::NamedTempFile`] that lives only for the duration of that
//! one parse; it is removed when dropped, on success and on every error
//! path alike.
//!
//! # Failure containment
//!
//! A file that fails to download, extract, or parse is recorded as
//! [`Skipped`] and the batch continues. Output order follows the input
//! key order.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Credentials, ParsingConfig};
use crate::extract::{content_type_for_key, extract_for_key, is_extractable, ExtractError};
use crate::models::{ExtractedDocument, Skipped};
use crate::store::ObjectStore;

/// High-fidelity parser for a local file.
#[async_trait]
pub trait LayoutParser: Send + Sync {
    /// Parse `path`; every returned document carries `source_key`.
    async fn parse_file(&self, path: &Path, source_key: &str) -> Result<Vec<ExtractedDocument>>;
}

/// Plain extractor reading straight from the object store.
#[async_trait]
pub trait TextLoader: Send + Sync {
    async fn load(&self, key: &str) -> Result<Vec<ExtractedDocument>>;
}

// ============ Plain loader ============

/// [`TextLoader`] that downloads the object and runs [`extract_for_key`].
///
/// Keys with no extractor (video, archives, images) are rejected before
/// anything is downloaded.
pub struct StoreTextLoader<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> StoreTextLoader<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TextLoader for StoreTextLoader<'_> {
    async fn load(&self, key: &str) -> Result<Vec<ExtractedDocument>> {
        if !is_extractable(key) {
            let content_type = content_type_for_key(key).to_string();
            return Err(ExtractError::UnsupportedContentType(content_type).into());
        }
        let bytes = self.store.get_object(key).await?;
        let text = extract_for_key(key, &bytes)?;
        Ok(vec![ExtractedDocument::new(key, text)])
    }
}

// ============ Selective parser ============

/// Result of one [`SelectiveParser::parse_all`] run.
#[derive(Debug, Default, Serialize)]
pub struct ParseReport {
    #[serde(skip)]
    pub documents: Vec<ExtractedDocument>,
    /// Files sent to the layout parser.
    pub layout_files: usize,
    /// Files sent to the plain extractor.
    pub plain_files: usize,
    pub skipped: Vec<Skipped>,
}

impl ParseReport {
    pub fn print(&self) {
        println!("parse");
        println!("  documents: {}", self.documents.len());
        println!("  layout-parsed files: {}", self.layout_files);
        println!("  plain files: {}", self.plain_files);
        println!("  skipped: {}", self.skipped.len());
        for s in &self.skipped {
            println!("    {}: {}", s.item, s.reason);
        }
    }
}

/// Routes stored files between the layout parser and the plain loader.
pub struct SelectiveParser<'a> {
    store: &'a dyn ObjectStore,
    layout: &'a dyn LayoutParser,
    loader: &'a dyn TextLoader,
    important: HashSet<String>,
}

impl<'a> SelectiveParser<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        layout: &'a dyn LayoutParser,
        loader: &'a dyn TextLoader,
        important: HashSet<String>,
    ) -> Self {
        Self {
            store,
            layout,
            loader,
            important,
        }
    }

    /// Parse every key in order, skipping (and recording) failures.
    pub async fn parse_all(&self, keys: &[String]) -> ParseReport {
        let mut report = ParseReport::default();

        for key in keys {
            let important = self.important.contains(key);
            let result = if important {
                report.layout_files += 1;
                self.parse_important(key).await
            } else {
                report.plain_files += 1;
                self.loader.load(key).await
            };

            match result {
                Ok(docs) => {
                    debug!(%key, important, documents = docs.len(), "parsed file");
                    report.documents.extend(docs);
                }
                Err(e) => {
                    warn!(%key, important, error = %format!("{:#}", e), "skipping file");
                    report.skipped.push(Skipped::new(key.as_str(), format!("{:#}", e)));
                }
            }
        }

        info!(
            documents = report.documents.len(),
            layout = report.layout_files,
            plain = report.plain_files,
            skipped = report.skipped.len(),
            "parsing finished"
        );
        report
    }

    async fn parse_important(&self, key: &str) -> Result<Vec<ExtractedDocument>> {
        let bytes = self.store.get_object(key).await?;
        let tmp = write_temp_file(key, &bytes)?;
        let docs = self.layout.parse_file(tmp.path(), key).await;
        drop(tmp);
        docs
    }
}

/// Write `bytes` to a fresh temporary file keeping the key's extension,
/// which the layout parser uses to detect the format.
fn write_temp_file(key: &str, bytes: &[u8]) -> Result<tempfile::NamedTempFile> {
    let suffix = key
        .rsplit('/')
        .next()
        .and_then(|f| f.rsplit_once('.'))
        .map(|(_, ext)| format!(".{}", ext))
        .unwrap_or_default();
    let mut tmp = tempfile::Builder::new()
        .prefix("course-harness-")
        .suffix(&suffix)
        .tempfile()
        .context("Failed to create temporary file")?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    Ok(tmp)
}

// ============ LlamaParse-compatible layout parser ============

/// Client for a LlamaParse-compatible parsing service.
///
/// Upload the file, poll the job until it succeeds, then fetch the result
/// in the configured format. Markdown results separate pages with a
/// `---` rule; each page becomes one document.
pub struct LlamaParseClient {
    config: ParsingConfig,
    api_key: String,
    client: reqwest::Client,
}

impl LlamaParseClient {
    /// # Errors
    ///
    /// Fails if `LLAMA_CLOUD_API_KEY` was not provided.
    pub fn new(config: &ParsingConfig, credentials: &Credentials) -> Result<Self> {
        let api_key = credentials.require_llama_cloud_key()?.to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("parse service error {}: {}", status, body);
        }
        Ok(resp.json().await?)
    }

    async fn upload(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(content_type_for_key(&file_name))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("result_type", self.config.result_type.clone());
        if self.config.premium_mode {
            form = form.text("premium_mode", "true");
        }

        let resp = self
            .client
            .post(self.url("upload"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("parse upload failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("parse service error {}: {}", status, body);
        }
        let json: serde_json::Value = resp.json().await?;
        json.get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("parse upload response has no job id"))
    }

    async fn wait_for(&self, job_id: &str) -> Result<()> {
        let url = self.url(&format!("job/{}", job_id));
        for _ in 0..self.config.max_polls {
            let json = self.get_json(&url).await?;
            match json.get("status").and_then(|s| s.as_str()).unwrap_or("") {
                "SUCCESS" => return Ok(()),
                "ERROR" | "CANCELED" | "CANCELLED" => {
                    bail!("parse job {} failed: {}", job_id, json)
                }
                _ => tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await,
            }
        }
        bail!(
            "parse job {} did not finish after {} polls",
            job_id,
            self.config.max_polls
        )
    }
}

#[async_trait]
impl LayoutParser for LlamaParseClient {
    async fn parse_file(&self, path: &Path, source_key: &str) -> Result<Vec<ExtractedDocument>> {
        let job_id = self.upload(path).await?;
        debug!(%source_key, %job_id, "parse job submitted");
        self.wait_for(&job_id).await?;

        let kind = self.config.result_type.as_str();
        let json = self
            .get_json(&self.url(&format!("job/{}/result/{}", job_id, kind)))
            .await?;
        let body = json
            .get(kind)
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("parse result has no '{}' field", kind))?;

        Ok(split_pages(body)
            .into_iter()
            .map(|page| ExtractedDocument::new(source_key, page))
            .collect())
    }
}

/// Split a parse result on page-separator rules, dropping empty pages.
pub fn split_pages(body: &str) -> Vec<String> {
    body.split("\n---\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
