//! Dense retrieval index: passages plus their embedding vectors.
//!
//! A [`RetrievalIndex`] is built once from the full set of extracted
//! documents and never updated in place; re-indexing is a full rebuild.
//! Documents are always split into passages ([`crate::chunk`]) before they
//! are embedded.
//!
//! # On-disk layout
//!
//! ```text
//! <local_root>/<name>/
//! ├── manifest.json     name, model, dims, passage count, build time
//! ├── passages.jsonl    one Passage per line, in vector order
//! └── vectors.bin       passages × dims little-endian f32
//! ```
//!
//! The directory is what gets mirrored to the object store by
//! [`crate::persist`].
//!
//! # Search
//!
//! Brute-force cosine similarity over every vector; ties keep passage
//! order. At course scale (thousands of passages) this is well under a
//! millisecond per query.

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chunk::chunk_document;
use crate::embedding::{blob_to_vec, cosine_similarity, embed_all, vec_to_blob, EmbeddingProvider};
use crate::models::{ExtractedDocument, Passage};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const PASSAGES_FILE: &str = "passages.jsonl";
pub const VECTORS_FILE: &str = "vectors.bin";

const FORMAT_VERSION: u32 = 1;

/// Index metadata stored as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub name: String,
    pub model: String,
    pub dims: usize,
    pub passages: usize,
    pub built_at: DateTime<Utc>,
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<'a> {
    pub passage: &'a Passage,
    pub score: f32,
}

/// Immutable in-memory index.
#[derive(Debug)]
pub struct RetrievalIndex {
    manifest: IndexManifest,
    passages: Vec<Passage>,
    vectors: Vec<Vec<f32>>,
}

impl RetrievalIndex {
    /// Chunk `documents`, embed every passage, and assemble the index.
    ///
    /// # Errors
    ///
    /// Fails if the documents yield no passages at all, or if embedding fails.
    pub async fn build(
        name: &str,
        documents: &[ExtractedDocument],
        embedder: &dyn EmbeddingProvider,
        max_tokens: usize,
        batch_size: usize,
    ) -> Result<Self> {
        let passages: Vec<Passage> = documents
            .iter()
            .flat_map(|doc| chunk_document(doc, max_tokens))
            .collect();
        if passages.is_empty() {
            bail!(
                "no passages to index ({} documents had no text)",
                documents.len()
            );
        }

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = embed_all(embedder, &texts, batch_size)
            .await
            .context("Failed to embed passages")?;

        let manifest = IndexManifest {
            format_version: FORMAT_VERSION,
            name: name.to_string(),
            model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            passages: passages.len(),
            built_at: Utc::now(),
        };
        info!(
            name,
            documents = documents.len(),
            passages = passages.len(),
            model = %manifest.model,
            "built index"
        );

        Ok(Self {
            manifest,
            passages,
            vectors,
        })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Fail unless the index was built by the same model, at the same
    /// dimensionality, as `embedder`. Query vectors from any other model
    /// score zero against every passage.
    pub fn ensure_embedder(&self, embedder: &dyn EmbeddingProvider) -> Result<()> {
        if self.manifest.model != embedder.model_name() || self.manifest.dims != embedder.dims() {
            bail!(
                "index was built with {} ({} dims) but the configured embedder is {} ({} dims)",
                self.manifest.model,
                self.manifest.dims,
                embedder.model_name(),
                embedder.dims()
            );
        }
        Ok(())
    }

    /// The `k` passages most similar to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit<'_>> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| SearchHit {
                passage: &self.passages[i],
                score,
            })
            .collect()
    }

    /// Write the index to `dir`, replacing whatever was there.
    pub fn save(&self, dir: &Path) -> Result<()> {
        if dir.exists() {
            fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
        }
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let manifest = serde_json::to_vec_pretty(&self.manifest)?;
        fs::write(dir.join(MANIFEST_FILE), manifest)?;

        let mut passages = BufWriter::new(fs::File::create(dir.join(PASSAGES_FILE))?);
        for p in &self.passages {
            serde_json::to_writer(&mut passages, p)?;
            passages.write_all(b"\n")?;
        }
        passages.flush()?;

        let mut vectors = BufWriter::new(fs::File::create(dir.join(VECTORS_FILE))?);
        for v in &self.vectors {
            vectors.write_all(&vec_to_blob(v))?;
        }
        vectors.flush()?;

        info!(dir = %dir.display(), passages = self.passages.len(), "saved index");
        Ok(())
    }

    /// Read an index written by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Fails if a file is missing or the three files disagree on counts.
    pub fn open(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest: IndexManifest = serde_json::from_slice(
            &fs::read(&manifest_path)
                .with_context(|| format!("Failed to read {}", manifest_path.display()))?,
        )
        .with_context(|| format!("Invalid {}", manifest_path.display()))?;
        if manifest.format_version != FORMAT_VERSION {
            bail!(
                "unsupported index format version {} (expected {})",
                manifest.format_version,
                FORMAT_VERSION
            );
        }

        let file = fs::File::open(dir.join(PASSAGES_FILE))
            .with_context(|| format!("Failed to open {}", PASSAGES_FILE))?;
        let mut passages = Vec::with_capacity(manifest.passages);
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let passage: Passage = serde_json::from_str(&line)
                .with_context(|| format!("{} line {} is invalid", PASSAGES_FILE, n + 1))?;
            passages.push(passage);
        }

        let blob = fs::read(dir.join(VECTORS_FILE))
            .with_context(|| format!("Failed to read {}", VECTORS_FILE))?;
        let expected = manifest.passages * manifest.dims * 4;
        if passages.len() != manifest.passages || blob.len() != expected || manifest.dims == 0 {
            bail!(
                "index at {} is inconsistent: {} passages, {} vector bytes, manifest says {} × {} dims",
                dir.display(),
                passages.len(),
                blob.len(),
                manifest.passages,
                manifest.dims
            );
        }
        let vectors = blob
            .chunks_exact(manifest.dims * 4)
            .map(blob_to_vec)
            .collect();

        Ok(Self {
            manifest,
            passages,
            vectors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Two-dimensional "embedding": counts of the words "rock" and "verb".
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![t.matches("rock").count() as f32, t.matches("verb").count() as f32]
                })
                .collect())
        }
    }

    fn docs() -> Vec<ExtractedDocument> {
        vec![
            ExtractedDocument::new("Geology/Week 1/syllabus.pdf", "Rocks and rock cycles."),
            ExtractedDocument::new("French/Intro/plan.docx", "Irregular verbs. Verb drills."),
            ExtractedDocument::new("French/Intro/blank.docx", "   "),
        ]
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let index = RetrievalIndex::build("test", &docs(), &KeywordEmbedder, 200, 8)
            .await
            .unwrap();
        assert_eq!(index.len(), 2);

        let hits = index.search(&[0.0, 1.0], 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].passage.source_key, "French/Intro/plan.docx");
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        assert_eq!(index.search(&[1.0, 0.0], 8).len(), 2);
    }

    #[tokio::test]
    async fn empty_documents_cannot_be_indexed() {
        let blank = vec![ExtractedDocument::new("k", "")];
        assert!(RetrievalIndex::build("test", &blank, &KeywordEmbedder, 200, 8)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn save_then_open_preserves_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("s3-rag-index");
        let index = RetrievalIndex::build("s3-rag-index", &docs(), &KeywordEmbedder, 200, 8)
            .await
            .unwrap();
        index.save(&dir).unwrap();

        let reopened = RetrievalIndex::open(&dir).unwrap();
        assert_eq!(reopened.manifest(), index.manifest());
        assert_eq!(reopened.passages(), index.passages());
        assert_eq!(
            reopened.search(&[1.0, 0.0], 1)[0].passage.source_key,
            "Geology/Week 1/syllabus.pdf"
        );
    }

    #[tokio::test]
    async fn embedder_must_match_the_manifest() {
        struct WideEmbedder;

        #[async_trait]
        impl EmbeddingProvider for WideEmbedder {
            fn model_name(&self) -> &str {
                "keyword"
            }
            fn dims(&self) -> usize {
                3
            }
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
            }
        }

        let index = RetrievalIndex::build("i", &docs(), &KeywordEmbedder, 200, 8)
            .await
            .unwrap();
        assert!(index.ensure_embedder(&KeywordEmbedder).is_ok());
        let err = index.ensure_embedder(&WideEmbedder).unwrap_err();
        assert!(err.to_string().contains("(2 dims)"));
    }

    #[tokio::test]
    async fn truncated_vectors_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let index = RetrievalIndex::build("i", &docs(), &KeywordEmbedder, 200, 8)
            .await
            .unwrap();
        index.save(tmp.path()).unwrap();
        fs::write(tmp.path().join(VECTORS_FILE), [0u8; 4]).unwrap();
        assert!(RetrievalIndex::open(tmp.path()).is_err());
    }
}
