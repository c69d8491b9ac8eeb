//! Mirror the local index directory to the object store, and restore it.
//!
//! # Marker protocol
//!
//! Every file under the local index directory is uploaded to
//! `{remote_prefix}/{relative path}`. Only after all uploads succeed is the
//! marker `{remote_prefix}/index_complete.marker` written, last. Before the
//! first upload any existing marker is deleted, so a persist that fails
//! midway never leaves a marker next to a half-replaced index. The marker
//! therefore exists only when a complete index is stored remotely.
//!
//! The marker body is a JSON listing of the files it vouches for:
//!
//! ```json
//! {
//!   "index": "s3-rag-index",
//!   "written_at": "2026-10-19T08:00:00Z",
//!   "files": [{ "path": "manifest.json", "size": 171, "sha256": "…" }]
//! }
//! ```
//!
//! # Restore
//!
//! [`IndexPersister::load`] downloads every object under the prefix except
//! the marker into a freshly cleared local mirror. A single failed download
//! is logged and skipped, but the restore is then checked against the
//! marker's listing (presence, size, SHA-256). A mirror that does not
//! match is an error, and the caller rebuilds instead.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::index::RetrievalIndex;
use crate::store::ObjectStore;

pub const MARKER_NAME: &str = "index_complete.marker";

/// Body of the completion marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerBody {
    pub index: String,
    pub written_at: DateTime<Utc>,
    pub files: Vec<MarkerEntry>,
}

/// One uploaded index file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerEntry {
    /// Path relative to the index directory, `/`-separated.
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// Persists and restores one named index.
pub struct IndexPersister<'a> {
    store: &'a dyn ObjectStore,
    name: String,
    prefix: String,
    local_dir: PathBuf,
}

impl<'a> IndexPersister<'a> {
    pub fn new(store: &'a dyn ObjectStore, config: &IndexConfig) -> Self {
        Self::with_local_dir(store, config, config.local_dir())
    }

    /// Like [`new`](Self::new) but mirroring into `local_dir`.
    pub fn with_local_dir(
        store: &'a dyn ObjectStore,
        config: &IndexConfig,
        local_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            name: config.name.clone(),
            prefix: config.remote_prefix.trim_end_matches('/').to_string(),
            local_dir,
        }
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn marker_key(&self) -> String {
        format!("{}/{}", self.prefix, MARKER_NAME)
    }

    fn remote_key(&self, relative: &str) -> String {
        format!("{}/{}", self.prefix, relative)
    }

    /// Whether a complete index is stored remotely.
    pub async fn marker_present(&self) -> bool {
        self.store.exists(&self.marker_key()).await
    }

    /// Upload the local index directory, then write the marker.
    ///
    /// # Errors
    ///
    /// Fails, without writing the marker, if the directory is empty or any
    /// upload fails.
    pub async fn persist(&self) -> Result<MarkerBody> {
        let files = local_files(&self.local_dir)?;
        if files.is_empty() {
            bail!("no index files under {}", self.local_dir.display());
        }

        self.store
            .delete_object(&self.marker_key())
            .await
            .context("Failed to withdraw previous completion marker")?;

        let mut entries = Vec::with_capacity(files.len());
        for (relative, path) in &files {
            let bytes =
                fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            let entry = MarkerEntry {
                path: relative.clone(),
                size: bytes.len() as u64,
                sha256: sha256_hex(&bytes),
            };
            let key = self.remote_key(relative);
            self.store
                .put_object(&key, bytes)
                .await
                .with_context(|| format!("Failed to upload {}", key))?;
            entries.push(entry);
        }

        let marker = MarkerBody {
            index: self.name.clone(),
            written_at: Utc::now(),
            files: entries,
        };
        self.store
            .put_object(&self.marker_key(), serde_json::to_vec_pretty(&marker)?)
            .await
            .context("Failed to write completion marker")?;

        info!(
            prefix = %self.prefix,
            files = marker.files.len(),
            "persisted index"
        );
        Ok(marker)
    }

    /// Restore the remote index into the local mirror and open it.
    ///
    /// Returns `Ok(None)` when no marker exists.
    ///
    /// # Errors
    ///
    /// Fails if the marker is unreadable, the object listing fails, or the
    /// restored mirror does not match the marker's file listing.
    pub async fn load(&self) -> Result<Option<RetrievalIndex>> {
        if !self.marker_present().await {
            info!(marker = %self.marker_key(), "no remote index");
            return Ok(None);
        }

        let marker: MarkerBody = serde_json::from_slice(
            &self
                .store
                .get_object(&self.marker_key())
                .await
                .context("Failed to fetch completion marker")?,
        )
        .context("Completion marker is not valid JSON")?;

        self.restore().await?;
        self.verify(&marker)?;

        let index = RetrievalIndex::open(&self.local_dir)?;
        info!(
            dir = %self.local_dir.display(),
            passages = index.len(),
            "restored index"
        );
        Ok(Some(index))
    }

    /// Download every object under the prefix, except the marker.
    async fn restore(&self) -> Result<()> {
        let list_prefix = format!("{}/", self.prefix);
        let keys = self
            .store
            .list_objects(&list_prefix)
            .await
            .context("Failed to list remote index")?;

        if self.local_dir.exists() {
            fs::remove_dir_all(&self.local_dir)
                .with_context(|| format!("Failed to clear {}", self.local_dir.display()))?;
        }
        fs::create_dir_all(&self.local_dir)?;

        let marker_key = self.marker_key();
        for key in keys.iter().filter(|k| **k != marker_key) {
            let Some(relative) = key.strip_prefix(&list_prefix).and_then(safe_relative) else {
                warn!(%key, "skipping remote object with unusable path");
                continue;
            };
            let dest = self.local_dir.join(relative);
            match self.store.get_object(key).await {
                Ok(bytes) => {
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&dest, bytes)
                        .with_context(|| format!("Failed to write {}", dest.display()))?;
                }
                Err(e) => warn!(%key, error = %e, "failed to download index file"),
            }
        }
        Ok(())
    }

    /// Check the local mirror against the marker's listing.
    fn verify(&self, marker: &MarkerBody) -> Result<()> {
        let mut bad = Vec::new();
        for entry in &marker.files {
            let path = self.local_dir.join(&entry.path);
            match fs::read(&path) {
                Ok(bytes) if bytes.len() as u64 == entry.size && sha256_hex(&bytes) == entry.sha256 => {}
                Ok(_) => bad.push(format!("{} (content mismatch)", entry.path)),
                Err(_) => bad.push(format!("{} (missing)", entry.path)),
            }
        }
        if !bad.is_empty() {
            bail!(
                "restored index is incomplete: {} of {} files bad: {}",
                bad.len(),
                marker.files.len(),
                bad.join(", ")
            );
        }
        Ok(())
    }
}

/// Every regular file under `dir`, as (relative `/` path, absolute path), sorted.
fn local_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    if !dir.is_dir() {
        bail!("index directory {} does not exist", dir.display());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.path().to_path_buf()));
    }
    Ok(files)
}

/// A remote relative path that stays inside the mirror directory.
fn safe_relative(relative: &str) -> Option<PathBuf> {
    let path = PathBuf::from(relative);
    let ok = !relative.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    ok.then_some(path)
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
