//! In-memory [`ObjectStore`] implementation for tests and offline runs.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock`, so listings come back in
//! key order like an S3 `ListObjectsV2` response.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::ObjectStore;

/// In-memory bucket.
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove `key`, returning whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.objects
            .write()
            .map(|mut o| o.remove(key).is_some())
            .unwrap_or(false)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("no such key: {}", key))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        self.objects
            .read()
            .map(|o| o.contains_key(key))
            .unwrap_or(false)
    }
}
