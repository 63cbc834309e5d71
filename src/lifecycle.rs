//! Host lifecycle: install, activate, then intercept.
//!
//! ```no_run
//! use tower::{Service, ServiceBuilder, ServiceExt};
//! use tower_offline_cache::prelude::*;
//!
//! # async fn run() -> Result<(), tower_offline_cache::layer::BoxError> {
//! let client = tower::service_fn(|_req: http::Request<()>| async {
//!     Ok::<_, std::convert::Infallible>(http::Response::new(http_body_util::Full::from("ok")))
//! });
//!
//! let cache = OfflineCache::builder(InMemoryStorage::default())
//!     .version("app-v2")
//!     .origin("https://app.example")
//!     .static_assets(["/", "/index.html", "/manifest.json"])
//!     .media_assets(["/media/icon.png"])
//!     .build()?;
//!
//! cache.install(client.clone()).await?;
//! let layer = cache.activate().await?;
//!
//! let mut client = ServiceBuilder::new().layer(layer).service(client);
//! let response = client
//!     .ready()
//!     .await?
//!     .call(http::Request::get("/index.html").body(())?)
//!     .await?;
//! # drop(response);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body::Body;
use serde::{Deserialize, Serialize};
use tower::Service;

#[cfg(feature = "tracing")]
use tracing::info;

use crate::backend::CacheStorage;
use crate::error::CacheError;
use crate::fingerprint;
use crate::generation::GenerationManager;
use crate::layer::{BoxError, OfflineLayer};
use crate::logging::{CacheEvent, CacheEventType, LoggingConfig};
use crate::policy::RoutePolicy;
use crate::revalidate::{RevalidateConfig, Revalidator};
use crate::store::Store;

/// Locators fetched into the store at install time.
///
/// Static shell resources come first, then media; both are fetched verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecacheManifest {
    pub static_assets: Vec<String>,
    pub media_assets: Vec<String>,
}

impl PrecacheManifest {
    /// All locators in install order.
    pub fn locators(&self) -> impl Iterator<Item = &str> {
        self.static_assets
            .iter()
            .chain(self.media_assets.iter())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.static_assets.len() + self.media_assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builder for [`OfflineCache`].
pub struct OfflineCacheBuilder<St> {
    storage: St,
    version: String,
    policy: RoutePolicy,
    manifest: PrecacheManifest,
    origin: Option<String>,
    revalidate: RevalidateConfig,
    network_timeout: Option<Duration>,
    logging: LoggingConfig,
}

impl<St> OfflineCacheBuilder<St>
where
    St: CacheStorage,
{
    pub fn new(storage: St) -> Self {
        Self {
            storage,
            version: "offline-v1".to_owned(),
            policy: RoutePolicy::default(),
            manifest: PrecacheManifest::default(),
            origin: None,
            revalidate: RevalidateConfig::default(),
            network_timeout: None,
            logging: LoggingConfig::default(),
        }
    }

    /// Name of the current store generation. Every other store is deleted
    /// on activation.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replaces the routing rules.
    pub fn policy(mut self, policy: RoutePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the whole pre-seed manifest.
    pub fn precache(mut self, manifest: PrecacheManifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn static_assets<I, S>(mut self, locators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest.static_assets = locators.into_iter().map(Into::into).collect();
        self
    }

    pub fn media_assets<I, S>(mut self, locators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest.media_assets = locators.into_iter().map(Into::into).collect();
        self
    }

    /// Origin relative locators and request URIs resolve against, e.g.
    /// `https://app.example`.
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn revalidate(mut self, config: RevalidateConfig) -> Self {
        self.revalidate = config;
        self
    }

    pub fn max_concurrent_revalidations(mut self, max: usize) -> Self {
        self.revalidate.max_concurrent = max;
        self
    }

    /// Bounds every network fetch the cache issues itself. Unset by default;
    /// the wrapped client's own timeouts apply.
    pub fn network_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.network_timeout = timeout;
        self
    }

    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging = config;
        self
    }

    /// Validates the configuration.
    pub fn build(self) -> Result<OfflineCache<St>, CacheError> {
        if self.version.is_empty() {
            return Err(CacheError::Config("store version must not be empty".into()));
        }
        self.revalidate.validate().map_err(CacheError::Config)?;
        let origin = self
            .origin
            .as_deref()
            .map(fingerprint::parse_origin)
            .transpose()?;

        Ok(OfflineCache {
            storage: self.storage,
            version: self.version,
            policy: self.policy,
            manifest: self.manifest,
            origin,
            revalidate: self.revalidate,
            network_timeout: self.network_timeout,
            logging: self.logging,
        })
    }
}

/// Lifecycle driver for one store version.
///
/// The host calls [`install`](Self::install) once, then
/// [`activate`](Self::activate) to obtain the [`OfflineLayer`] that
/// intercepts requests.
#[derive(Clone)]
pub struct OfflineCache<St> {
    storage: St,
    version: String,
    policy: RoutePolicy,
    manifest: PrecacheManifest,
    origin: Option<Uri>,
    revalidate: RevalidateConfig,
    network_timeout: Option<Duration>,
    logging: LoggingConfig,
}

impl<St> OfflineCache<St>
where
    St: CacheStorage,
{
    pub fn builder(storage: St) -> OfflineCacheBuilder<St> {
        OfflineCacheBuilder::new(storage)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn manifest(&self) -> &PrecacheManifest {
        &self.manifest
    }

    /// Opens the current store and pre-seeds it from the manifest through
    /// `service`.
    ///
    /// Fails if any locator is invalid, any fetch fails or answers anything
    /// but `200 OK`, or the store cannot be opened. The host retries by
    /// calling `install` again, which fetches the whole manifest anew.
    /// Returns the number of entries written.
    pub async fn install<S, ReqBody, ResBody>(&self, service: S) -> Result<usize, CacheError>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone,
        S::Error: Into<BoxError>,
        ReqBody: Default,
        ResBody: Body<Data = Bytes>,
        ResBody::Error: Into<BoxError>,
    {
        let targets = self
            .manifest
            .locators()
            .map(|locator| fingerprint::resolve_locator(locator, self.origin.as_ref()))
            .collect::<Result<Vec<Uri>, CacheError>>()?;

        let store = Store::open(&self.storage, &self.version).await?;

        #[cfg(feature = "tracing")]
        info!(store = %self.version, assets = targets.len(), "pre-caching critical assets");

        let written = store
            .populate(service, targets, self.network_timeout)
            .await?;

        CacheEvent::new(CacheEventType::Precache, self.version.as_str())
            .with_detail(format!("{written} assets"))
            .log(&self.logging);
        Ok(written)
    }

    /// Deletes every superseded store generation, then returns the layer
    /// that serves from the current one.
    ///
    /// No layer exists until reconciliation has finished, so traffic is
    /// never served while an older generation is still reachable.
    pub async fn activate(&self) -> Result<OfflineLayer<St::Backend>, CacheError> {
        let deleted = GenerationManager::new(self.storage.clone(), self.version.clone())
            .reconcile()
            .await?;
        for name in deleted {
            CacheEvent::new(CacheEventType::GenerationDeleted, name).log(&self.logging);
        }

        let store = Store::open(&self.storage, &self.version).await?;

        #[cfg(feature = "tracing")]
        info!(store = %self.version, "offline cache active");

        Ok(OfflineLayer::new(
            store,
            self.policy.clone(),
            self.origin.clone(),
            Revalidator::new(self.revalidate.clone(), self.logging.clone()),
            self.network_timeout,
            self.logging.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryStorage;

    #[test]
    fn manifest_orders_static_before_media() {
        let manifest = PrecacheManifest {
            static_assets: vec!["/".into(), "/index.html".into()],
            media_assets: vec!["/media/icon.png".into()],
        };
        let locators: Vec<&str> = manifest.locators().collect();
        assert_eq!(locators, ["/", "/index.html", "/media/icon.png"]);
        assert_eq!(manifest.len(), 3);
    }

    #[test]
    fn build_rejects_bad_configuration() {
        let bad_origin = OfflineCache::builder(InMemoryStorage::default())
            .origin("not an origin")
            .build();
        assert!(matches!(bad_origin, Err(CacheError::InvalidLocator { .. })));

        let bad_version = OfflineCache::builder(InMemoryStorage::default())
            .version("")
            .build();
        assert!(bad_version.is_err());

        let bad_pool = OfflineCache::builder(InMemoryStorage::default())
            .max_concurrent_revalidations(0)
            .build();
        assert!(matches!(bad_pool, Err(CacheError::Config(_))));
    }

    #[test]
    fn manifest_deserializes_from_json() {
        let manifest: PrecacheManifest =
            serde_json::from_str(r#"{"static_assets":["/"],"media_assets":["/media/a.gif"]}"#)
                .unwrap();
        assert_eq!(manifest.locators().count(), 2);
    }
}
