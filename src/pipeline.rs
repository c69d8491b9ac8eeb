//! Indexing pipeline: stored files → classification → parsing → index.
//!
//! [`rebuild`] runs the whole chain once and persists the result.
//! [`initialize`] is the startup policy for serving: restore the remote
//! index when a complete one built by the configured embedder exists,
//! otherwise rebuild. Only when both fail does it give up with a "nothing
//! to serve" error.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{error, info, warn};

use crate::classify::{important_files, Classification, DocumentClassifier};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::index::RetrievalIndex;
use crate::llm::ChatModel;
use crate::parse::{LayoutParser, ParseReport, SelectiveParser, TextLoader};
use crate::persist::IndexPersister;
use crate::store::ObjectStore;

/// The collaborators an indexing run talks to.
pub struct IndexingServices<'a> {
    pub store: &'a dyn ObjectStore,
    pub chat: &'a dyn ChatModel,
    pub layout: &'a dyn LayoutParser,
    pub loader: &'a dyn TextLoader,
    pub embedder: &'a dyn EmbeddingProvider,
}

/// What one [`rebuild`] did.
#[derive(Debug)]
pub struct RebuildReport {
    pub files: usize,
    pub classification: Classification,
    pub parse: ParseReport,
    pub passages: usize,
    /// Whether the index reached the object store with its marker.
    pub persisted: bool,
}

impl RebuildReport {
    pub fn print(&self) {
        println!("index");
        println!("  stored files: {}", self.files);
        println!(
            "  important files: {}",
            important_files(&self.classification).len()
        );
        self.parse.print();
        println!("  passages: {}", self.passages);
        println!("  persisted: {}", if self.persisted { "yes" } else { "no" });
        println!("ok");
    }
}

/// Keys of ingested course files, in store listing order.
///
/// Objects under the index prefix and keys matching
/// `storage.exclude_globs` are left out.
pub async fn list_stored_files(store: &dyn ObjectStore, config: &Config) -> Result<Vec<String>> {
    let index_prefix = format!("{}/", config.index.remote_prefix.trim_end_matches('/'));
    let excludes = build_globset(&config.storage.exclude_globs)?;

    let keys = store
        .list_objects("")
        .await
        .context("Failed to list stored files")?;
    Ok(keys
        .into_iter()
        .filter(|k| !k.starts_with(&index_prefix))
        .filter(|k| !k.ends_with('/'))
        .filter(|k| !excludes.is_match(k))
        .collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Classify, parse, build, save, and persist a fresh index.
///
/// A persistence failure is logged and reported but does not fail the
/// rebuild: the freshly built index is still usable for this process.
pub async fn rebuild(
    config: &Config,
    services: &IndexingServices<'_>,
) -> Result<(RetrievalIndex, RebuildReport)> {
    let keys = list_stored_files(services.store, config).await?;
    if keys.is_empty() {
        bail!("no course files in the object store; run `course ingest` first");
    }
    info!(files = keys.len(), "rebuilding index");

    let classification = DocumentClassifier::new(services.chat).classify(&keys).await;
    let important: HashSet<String> = important_files(&classification);

    let parser = SelectiveParser::new(services.store, services.layout, services.loader, important);
    let parse = parser.parse_all(&keys).await;
    if parse.documents.is_empty() {
        bail!(
            "none of the {} stored files produced any text ({} skipped)",
            keys.len(),
            parse.skipped.len()
        );
    }

    let index = RetrievalIndex::build(
        &config.index.name,
        &parse.documents,
        services.embedder,
        config.chunking.max_tokens,
        config.embedding.batch_size,
    )
    .await?;

    let local_dir = config.index.local_dir();
    index.save(&local_dir)?;

    let persister = IndexPersister::new(services.store, &config.index);
    let persisted = match persister.persist().await {
        Ok(_) => true,
        Err(e) => {
            error!(error = %format!("{:#}", e), "index persist failed; marker withheld");
            false
        }
    };

    let report = RebuildReport {
        files: keys.len(),
        passages: index.len(),
        classification,
        parse,
        persisted,
    };
    Ok((index, report))
}

/// Restore the remote index when a complete one exists and was built with
/// `embedder`.
///
/// Every failure is logged and yields `None`, leaving the caller to rebuild.
pub async fn restore_remote(
    config: &Config,
    store: &dyn ObjectStore,
    embedder: &dyn EmbeddingProvider,
) -> Option<RetrievalIndex> {
    let persister = IndexPersister::new(store, &config.index);
    match persister.load().await {
        Ok(Some(index)) => match index.ensure_embedder(embedder) {
            Ok(()) => Some(index),
            Err(e) => {
                warn!(error = %e, "remote index does not match the embedder; rebuilding");
                None
            }
        },
        Ok(None) => {
            info!("no remote index; building one");
            None
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "remote index restore failed; rebuilding");
            None
        }
    }
}

/// Rebuild for serving after [`restore_remote`] came back empty.
///
/// # Errors
///
/// Fails when the rebuild fails: there is nothing to serve.
pub async fn rebuild_for_serving(
    config: &Config,
    services: &IndexingServices<'_>,
) -> Result<RetrievalIndex> {
    match rebuild(config, services).await {
        Ok((index, report)) => {
            if !report.persisted {
                warn!("serving an index that was not persisted");
            }
            Ok(index)
        }
        Err(e) => Err(e.context("nothing to serve: no remote index and the rebuild failed")),
    }
}

/// Startup policy: prefer the remote index, fall back to a rebuild.
///
/// # Errors
///
/// Fails only when there is nothing to serve: no usable remote index and
/// the rebuild failed too.
pub async fn initialize(config: &Config, services: &IndexingServices<'_>) -> Result<RetrievalIndex> {
    if let Some(index) = restore_remote(config, services.store, services.embedder).await {
        return Ok(index);
    }
    rebuild_for_serving(config, services).await
}
