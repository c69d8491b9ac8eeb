//! Object store abstraction.
//!
//! The [`ObjectStore`] trait is the bucket-scoped key/value blob interface
//! used by ingestion, parsing, and index persistence. Keys are
//! slash-delimited hierarchical paths.
//!
//! | Implementation | Purpose |
//! |----------------|---------|
//! | [`s3::S3Store`] | Amazon S3 (or compatible) over SigV4-signed HTTP |
//! | [`memory::InMemoryStore`] | Tests and offline runs |

pub mod memory;
pub mod s3;
mod sigv4;

use anyhow::Result;
use async_trait::async_trait;

/// Bucket-scoped blob storage.
///
/// `put_object` is last-writer-wins on key collision, so re-ingesting the
/// same file is idempotent by construction.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing any existing object.
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()>;

    /// List every key starting with `prefix` (empty prefix lists the bucket).
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;

    /// Fetch the full body of `key`.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove `key`. Deleting an absent key succeeds.
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// Metadata probe. Any failure, including "not found", reads as `false`.
    async fn exists(&self, key: &str) -> bool;
}
