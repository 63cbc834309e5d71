//! Storage backends for the offline cache.
//!
//! Storage is split in two levels:
//! - [`CacheStorage`] is the registry of named stores. Each name is one
//!   store generation; the registry can enumerate and delete whole stores.
//! - [`CacheBackend`] is a single open store mapping request fingerprints to
//!   response snapshots.
//!
//! This module ships with:
//! - [`memory::InMemoryStorage`]: process-local stores backed by [`moka`].
//! - `redis::RedisStorage` *(optional)*: stores kept in Redis when the
//!   `redis-backend` crate feature is enabled.

pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;

use async_trait::async_trait;
use bytes::Bytes;
use http::response::Parts;
use http::{HeaderName, HeaderValue, Response, StatusCode, Version};

use crate::error::CacheError;

/// Snapshot of a response as it existed when it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub version: Version,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
}

impl CacheEntry {
    /// Creates a new cached response entry.
    pub fn new(
        status: StatusCode,
        version: Version,
        headers: Vec<(String, Vec<u8>)>,
        body: Bytes,
    ) -> Self {
        Self {
            status,
            version,
            headers,
            body,
        }
    }

    /// Captures response head and collected body, keeping every header.
    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
            .collect();
        Self::new(parts.status, parts.version, headers, body)
    }

    /// Converts the entry back into an `http::Response`.
    pub fn into_response(self) -> Response<http_body_util::Full<Bytes>> {
        let mut response = Response::new(http_body_util::Full::from(self.body));
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(&value),
            ) {
                headers.append(name, value);
            }
        }

        response
    }
}

/// A single open store.
///
/// `put` must be an atomic create-or-replace for its key: concurrent readers
/// observe either the previous entry or the new one, never a mix.
#[async_trait]
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Fetches the entry stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    /// Stores `entry` under `key`, replacing any previous entry.
    async fn put(&self, key: String, entry: CacheEntry) -> Result<(), CacheError>;
}

/// Registry of named, versioned stores.
#[async_trait]
pub trait CacheStorage: Send + Sync + Clone + 'static {
    type Backend: CacheBackend;

    /// Opens the store called `name`, creating an empty one if absent.
    ///
    /// Opening the same name twice yields the same logical store.
    async fn open(&self, name: &str) -> Result<Self::Backend, CacheError>;
    /// Lists the names of every existing store.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;
    /// Deletes the store called `name` with all its entries.
    ///
    /// Returns `false` when no such store existed.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;
}
