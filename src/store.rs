//! The versioned response store the dispatcher reads and writes.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode, Uri};
use http_body::Body;
use tower::Service;

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::backend::{CacheBackend, CacheEntry, CacheStorage};
use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::layer::BoxError;
use crate::network;

/// Handle to one named store generation.
///
/// Every mutation goes through [`Store::put`], which only keeps `200 OK`
/// responses. Cloning is cheap and shares the underlying backend.
#[derive(Clone)]
pub struct Store<B> {
    name: Arc<str>,
    backend: B,
}

impl<B> Store<B>
where
    B: CacheBackend,
{
    /// Opens (or creates) the store for `version` in `storage`.
    pub async fn open<St>(storage: &St, version: &str) -> Result<Self, CacheError>
    where
        St: CacheStorage<Backend = B>,
    {
        let backend = storage.open(version).await?;
        Ok(Self::new(version, backend))
    }

    /// Wraps an already opened backend.
    pub fn new(name: impl Into<Arc<str>>, backend: B) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }

    /// The store's version name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up the entry for `fingerprint`. Never touches the network.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        self.backend.get(fingerprint.as_str()).await
    }

    /// Stores `entry` if and only if its status is exactly `200 OK`,
    /// replacing any previous entry for `fingerprint`.
    ///
    /// Returns whether the entry was written.
    pub async fn put(&self, fingerprint: &Fingerprint, entry: CacheEntry) -> Result<bool, CacheError> {
        if entry.status != StatusCode::OK {
            #[cfg(feature = "metrics")]
            counter!("tower_offline_cache.store_skipped").increment(1);
            return Ok(false);
        }

        self.backend
            .put(fingerprint.as_str().to_owned(), entry)
            .await?;

        #[cfg(feature = "metrics")]
        counter!("tower_offline_cache.store").increment(1);
        Ok(true)
    }

    /// Fetches every target through `service` and stores the responses.
    ///
    /// Targets are fetched in order. The first transport error or non-`200`
    /// status stops the run with [`CacheError::Precache`]; entries stored
    /// before it stay in place and are overwritten by the next attempt.
    /// Returns the number of entries written.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(store = %self.name))
    )]
    pub async fn populate<S, ReqBody, ResBody, I>(
        &self,
        service: S,
        targets: I,
        timeout: Option<Duration>,
    ) -> Result<usize, CacheError>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone,
        S::Error: Into<BoxError>,
        ReqBody: Default,
        ResBody: Body<Data = Bytes>,
        ResBody::Error: Into<BoxError>,
        I: IntoIterator<Item = Uri>,
    {
        let mut written = 0;

        for target in targets {
            let locator = target.to_string();
            let precache_error = |reason: String| CacheError::Precache {
                locator: locator.clone(),
                reason,
            };

            let fingerprint = Fingerprint::of(&target)
                .ok_or_else(|| precache_error("locator is not absolute".to_owned()))?;
            let request = Request::builder()
                .method(Method::GET)
                .uri(target)
                .body(ReqBody::default())
                .map_err(|err| precache_error(err.to_string()))?;

            let fetched = network::fetch(service.clone(), request, timeout)
                .await
                .map_err(|err| precache_error(err.to_string()))?;
            if fetched.status() != StatusCode::OK {
                return Err(precache_error(format!("status {}", fetched.status())));
            }

            self.put(&fingerprint, fetched.to_entry()).await?;
            written += 1;

            #[cfg(feature = "tracing")]
            tracing::debug!(key = %fingerprint, "pre-cached");
        }

        Ok(written)
    }
}
