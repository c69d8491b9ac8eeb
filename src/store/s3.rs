//! Amazon S3 object store.
//!
//! Speaks the S3 REST API directly, signing each request with
//! [`super::sigv4`]. Covers `ListObjectsV2` (following continuation
//! tokens), `PutObject`, `GetObject`, `DeleteObject`, `HeadObject`, and
//! create-if-absent for the bucket. Custom endpoints (MinIO, LocalStack)
//! are addressed path-style; AWS itself virtual-hosted style.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! bucket = "canvas-files-autodoc"
//! region = "us-east-2"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! Credentials come from [`Credentials`]: `AWS_ACCESS_KEY_ID`,
//! `AWS_SECRET_ACCESS_KEY`, and optionally `AWS_SESSION_TOKEN`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::Event;
use reqwest::{Method, Response, StatusCode};
use tracing::{debug, info};

use super::sigv4::{encode_key, uri_encode, AwsKeys, Signer, UnsignedRequest};
use super::ObjectStore;
use crate::config::{Credentials, StorageConfig};

/// Where requests go: `{scheme}://{host}{path_prefix}/{key}`.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    scheme: &'static str,
    host: String,
    /// `/{bucket}` for path-style addressing, empty for virtual-hosted.
    path_prefix: String,
}

/// S3 bucket handle.
pub struct S3Store {
    bucket: String,
    region: String,
    target: Target,
    signer: Signer,
    client: reqwest::Client,
}

impl S3Store {
    /// # Errors
    ///
    /// Fails if the AWS access key or secret is missing.
    pub fn new(config: &StorageConfig, credentials: &Credentials) -> Result<Self> {
        let (access_key_id, secret_access_key) = credentials.require_aws()?;
        let keys = AwsKeys {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: credentials.aws_session_token.clone(),
        };
        Ok(Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            target: target(&config.bucket, &config.region, config.endpoint_url.as_deref()),
            signer: Signer::new(keys, &config.region, "s3"),
            client: reqwest::Client::new(),
        })
    }

    /// Create the bucket unless it already exists. Called once at startup.
    pub async fn ensure_bucket(&self) -> Result<()> {
        let status = self.send(Method::HEAD, None, &[], Vec::new()).await?.status();
        if status.is_success() {
            debug!(bucket = %self.bucket, "bucket exists");
            return Ok(());
        }
        if status != StatusCode::NOT_FOUND {
            bail!("S3 HeadBucket on '{}' failed (HTTP {})", self.bucket, status);
        }

        // us-east-1 rejects an explicit location constraint.
        let body = if self.region == "us-east-1" {
            Vec::new()
        } else {
            format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
                 <LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.region
            )
            .into_bytes()
        };
        let resp = self.send(Method::PUT, None, &[], body).await?;
        check(resp, "CreateBucket", &self.bucket).await?;
        info!(bucket = %self.bucket, region = %self.region, "created bucket");
        Ok(())
    }

    /// Sign and send a request for the bucket (`key = None`) or one object.
    async fn send(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<Response> {
        let path = match key {
            Some(key) => format!("{}/{}", self.target.path_prefix, encode_key(key)),
            None if self.target.path_prefix.is_empty() => "/".to_string(),
            None => self.target.path_prefix.clone(),
        };

        let signed = self.signer.sign(
            &UnsignedRequest {
                method: method.as_str(),
                host: &self.target.host,
                path: &path,
                query,
                payload: &body,
            },
            Utc::now(),
        )?;

        let mut url = format!("{}://{}{}", self.target.scheme, self.target.host, path);
        if !signed.query.is_empty() {
            url.push('?');
            url.push_str(&signed.query);
        }

        let mut request = self.client.request(method.clone(), &url);
        for (name, value) in signed.headers {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        debug!(%method, %url, "s3 request");
        request
            .send()
            .await
            .with_context(|| format!("S3 {} s3://{}{} failed", method, self.bucket, path))
    }
}

/// Virtual-hosted AWS addressing, or path-style for a custom endpoint.
fn target(bucket: &str, region: &str, endpoint_url: Option<&str>) -> Target {
    match endpoint_url {
        Some(endpoint) => {
            let (scheme, rest) = match endpoint.strip_prefix("http://") {
                Some(rest) => ("http", rest),
                None => ("https", endpoint.strip_prefix("https://").unwrap_or(endpoint)),
            };
            Target {
                scheme,
                host: rest.trim_end_matches('/').to_string(),
                path_prefix: format!("/{}", uri_encode(bucket)),
            }
        }
        None => Target {
            scheme: "https",
            host: format!("{}.s3.{}.amazonaws.com", bucket, region),
            path_prefix: String::new(),
        },
    }
}

/// Turn a non-2xx response into an error naming the operation.
async fn check(resp: Response, operation: &str, subject: &str) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    bail!(
        "S3 {} failed (HTTP {}) for '{}': {}",
        operation,
        status,
        subject,
        body.chars().take(500).collect::<String>()
    )
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let size = body.len();
        let resp = self.send(Method::PUT, Some(key), &[], body).await?;
        check(resp, "PutObject", key).await?;
        debug!(key, size, "uploaded object");
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![("list-type".to_string(), "2".to_string())];
            if !prefix.is_empty() {
                query.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(t) = token.take() {
                query.push(("continuation-token".to_string(), t));
            }

            let resp = self.send(Method::GET, None, &query, Vec::new()).await?;
            let xml = check(resp, "ListObjectsV2", prefix).await?.text().await?;
            let page = parse_list_page(&xml)?;
            keys.extend(page.keys);

            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self.send(Method::GET, Some(key), &[], Vec::new()).await?;
        Ok(check(resp, "GetObject", key).await?.bytes().await?.to_vec())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        // S3 answers 204 whether or not the key existed.
        let resp = self.send(Method::DELETE, Some(key), &[], Vec::new()).await?;
        check(resp, "DeleteObject", key).await?;
        debug!(key, "deleted object");
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        match self.send(Method::HEAD, Some(key), &[], Vec::new()).await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(key, error = %e, "head object failed");
                false
            }
        }
    }
}

// ============ ListObjectsV2 response ============

#[derive(Debug, Default, PartialEq)]
struct ListPage {
    /// Object keys, directory placeholders (trailing `/`) dropped.
    keys: Vec<String>,
    /// Set only when the listing is truncated.
    next_token: Option<String>,
}

fn parse_list_page(xml: &str) -> Result<ListPage> {
    enum Field {
        Key,
        Truncated,
        Token,
    }

    let mut reader = quick_xml::Reader::from_str(xml);
    let mut page = ListPage::default();
    let mut truncated = false;
    let mut token = None;
    let mut in_contents = false;
    let mut field = None;

    loop {
        match reader.read_event().context("malformed ListObjectsV2 response")? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Contents" => in_contents = true,
                b"Key" if in_contents => field = Some(Field::Key),
                b"IsTruncated" => field = Some(Field::Truncated),
                b"NextContinuationToken" => field = Some(Field::Token),
                _ => {}
            },
            Event::Text(text) => {
                let value = text.unescape()?.trim().to_string();
                match field {
                    Some(Field::Key) if !value.is_empty() && !value.ends_with('/') => {
                        page.keys.push(value)
                    }
                    Some(Field::Truncated) => truncated = value == "true",
                    Some(Field::Token) if !value.is_empty() => token = Some(value),
                    _ => {}
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"Contents" {
                    in_contents = false;
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if truncated {
        page.next_token = token;
    }
    Ok(page)
}
