//! Canvas LMS connector.
//!
//! Paginated fetch of courses, course modules, and module items from the
//! Canvas REST API, plus resolution of a file item to its bytes.
//!
//! # Pagination
//!
//! Canvas communicates pagination through the `Link` response header
//! (`<https://…&page=2>; rel="next"`). Every list call follows `next`
//! links until they run out and returns the concatenation of all pages in
//! server order.
//!
//! # Partial results
//!
//! A non-2xx page is logged and ends the traversal: the caller receives
//! whatever was accumulated up to that point. Transport and decoding
//! errors are returned as `Err` so the caller can skip the enclosing
//! course. Nothing is retried.
//!
//! # Authentication
//!
//! Every request carries `Authorization: Bearer $CANVAS_API_TOKEN`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, LINK};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{CanvasConfig, Credentials};
use crate::models::{Course, Module, ModuleItem, RawModuleItem};

/// Authenticated Canvas API client.
pub struct CanvasClient {
    base_url: String,
    token: String,
    per_page: u32,
    client: reqwest::Client,
}

/// File metadata returned by `GET /files/:id`. Only the download URL matters.
#[derive(Debug, Deserialize)]
struct FileMetadata {
    #[serde(default)]
    url: Option<String>,
}

impl CanvasClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Fails if `CANVAS_API_TOKEN` was not provided.
    pub fn new(config: &CanvasConfig, credentials: &Credentials) -> Result<Self> {
        let token = credentials.require_canvas_token()?.to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            per_page: config.per_page,
            client,
        })
    }

    /// All courses visible to the token.
    pub async fn list_courses(&self) -> Result<Vec<Course>> {
        let url = format!("{}/courses", self.base_url);
        self.fetch_all(&url).await
    }

    /// All modules of one course.
    pub async fn list_modules(&self, course_id: u64) -> Result<Vec<Module>> {
        let url = format!("{}/courses/{}/modules", self.base_url, course_id);
        self.fetch_all(&url).await
    }

    /// All items behind a module's `items_url`.
    pub async fn list_module_items(&self, items_url: &str) -> Result<Vec<ModuleItem>> {
        let raw: Vec<RawModuleItem> = self.fetch_all(items_url).await?;
        Ok(raw.into_iter().map(ModuleItem::from).collect())
    }

    /// Resolve a file item's API URL to its download URL, then fetch the bytes.
    pub async fn download_file(&self, file_url: &str) -> Result<Vec<u8>> {
        let resp = self.get(file_url).await?;
        if !resp.status().is_success() {
            bail!(
                "fetching file metadata {} failed (HTTP {})",
                file_url,
                resp.status()
            );
        }
        let metadata: FileMetadata = resp
            .json()
            .await
            .with_context(|| format!("invalid file metadata from {}", file_url))?;
        let download_url = metadata
            .url
            .filter(|u| !u.is_empty())
            .with_context(|| format!("no download url in metadata for {}", file_url))?;

        let resp = self.get(&download_url).await?;
        if !resp.status().is_success() {
            bail!(
                "downloading {} failed (HTTP {})",
                download_url,
                resp.status()
            );
        }
        let bytes = resp.bytes().await?;
        debug!(url = %download_url, size = bytes.len(), "downloaded file");
        Ok(bytes.to_vec())
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))
    }

    /// Follow `rel="next"` links from `first_url`, concatenating every page.
    async fn fetch_all<T: DeserializeOwned>(&self, first_url: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(with_per_page(first_url, self.per_page));

        while let Some(url) = next.take() {
            let resp = self.get(&url).await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                warn!(
                    %url,
                    %status,
                    body = %body.chars().take(300).collect::<String>(),
                    kept = items.len(),
                    "page request failed; returning partial results"
                );
                break;
            }

            next = next_link(resp.headers());
            let page: Vec<T> = resp
                .json()
                .await
                .with_context(|| format!("invalid JSON page from {}", url))?;
            debug!(%url, count = page.len(), "fetched page");
            items.extend(page);
        }

        Ok(items)
    }
}

/// Add `per_page` to a first-page URL unless the caller already set it.
fn with_per_page(url: &str, per_page: u32) -> String {
    if url.contains("per_page=") {
        return url.to_string();
    }
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}per_page={}", url, sep, per_page)
}

/// The `rel="next"` target of a response's `Link` header, if any.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(parse_next_link)
}

/// Parse an RFC 8288 `Link` header value and return the `next` URL.
fn parse_next_link(value: &str) -> Option<String> {
    value.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let url = target.strip_prefix('<')?.strip_suffix('>')?;
        let is_next = pieces.any(|p| {
            let p = p.trim();
            p.strip_prefix("rel=")
                .map(|rel| rel.trim_matches('"').split_whitespace().any(|r| r == "next"))
                .unwrap_or(false)
        });
        is_next.then(|| url.to_string())
    })
}
