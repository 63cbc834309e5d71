use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use std::sync::Arc;

use super::{CacheBackend, CacheEntry, CacheStorage};
use crate::error::CacheError;

/// An in-memory [`CacheBackend`] implementation backed by [`moka`].
///
/// The backend is cheap to clone and shares a single underlying cache.
#[derive(Clone)]
pub struct InMemoryBackend {
    cache: Cache<String, CacheEntry>,
}

impl InMemoryBackend {
    /// Creates an unbounded in-memory store. Entries stay until replaced or
    /// until the store is deleted.
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().build(),
        }
    }

    /// Creates a store holding about `max_capacity` entries.
    ///
    /// Past the bound moka evicts entries on its own, so a successful `put`
    /// no longer guarantees a later `get` finds the entry.
    pub fn with_max_capacity(max_capacity: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_capacity).build(),
        }
    }

    fn with_bound(max_capacity: Option<u64>) -> Self {
        match max_capacity {
            Some(max) => Self::with_max_capacity(max),
            None => Self::new(),
        }
    }

    fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.cache.get(key).await)
    }

    async fn put(&self, key: String, entry: CacheEntry) -> Result<(), CacheError> {
        self.cache.insert(key, entry).await;
        Ok(())
    }
}

/// Process-local registry of named [`InMemoryBackend`] stores.
///
/// Stores are unbounded unless [`with_max_capacity`](Self::with_max_capacity)
/// is set. Clones share the same set of stores.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    stores: Arc<DashMap<String, InMemoryBackend>>,
    max_capacity: Option<u64>,
}

impl InMemoryStorage {
    /// Creates an empty registry of unbounded stores.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds every store opened afterwards to about `max_capacity` entries.
    ///
    /// Bounded stores evict on their own: pre-seeded assets may disappear
    /// and be served from the network again.
    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = Some(max_capacity);
        self
    }
}

#[async_trait]
impl CacheStorage for InMemoryStorage {
    type Backend = InMemoryBackend;

    async fn open(&self, name: &str) -> Result<InMemoryBackend, CacheError> {
        let backend = self
            .stores
            .entry(name.to_owned())
            .or_insert_with(|| InMemoryBackend::with_bound(self.max_capacity))
            .clone();
        Ok(backend)
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut names: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        match self.stores.remove(name) {
            Some((_, backend)) => {
                // Handles still held elsewhere must not keep serving old entries.
                backend.clear();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
