//! Tower Offline Cache
//! ===================
//!
//! `tower-offline-cache` is an offline-first request-interception layer for
//! Tower-based HTTP clients. It keeps a versioned store of `200 OK` GET
//! responses and answers requests with one of three strategies:
//!
//! - **bypass** for configured backend domains: always the network;
//! - **cache-first** for media paths, with a background refresh of hero images;
//! - **stale-while-revalidate** for everything else.
//!
//! The host drives a two-phase lifecycle through [`OfflineCache`]: `install`
//! pre-seeds the store with the critical assets, and `activate` deletes
//! superseded store generations before handing out the [`OfflineLayer`]:
//!
//! ```no_run
//! use tower::{Service, ServiceBuilder, ServiceExt};
//! use tower_offline_cache::prelude::*;
//!
//! # async fn run() -> Result<(), tower_offline_cache::layer::BoxError> {
//! let network = tower::service_fn(|_req: http::Request<()>| async {
//!     Ok::<_, std::convert::Infallible>(http::Response::new(http_body_util::Full::from("ok")))
//! });
//!
//! let cache = OfflineCache::builder(InMemoryStorage::default())
//!     .version("app-v2")
//!     .origin("https://app.example")
//!     .static_assets(["/", "/index.html"])
//!     .build()?;
//! cache.install(network.clone()).await?;
//!
//! let mut svc = ServiceBuilder::new()
//!     .layer(cache.activate().await?)
//!     .service(network);
//!
//! let response = svc
//!     .ready()
//!     .await?
//!     .call(http::Request::get("/index.html").body(())?)
//!     .await?;
//! # drop(response);
//! # Ok(())
//! # }
//! ```
//!
//! ## Status
//! The project is under active development. The public API is not yet stabilized.

pub mod backend;
pub mod codec;
pub mod error;
pub mod fingerprint;
pub mod generation;
pub mod layer;
pub mod lifecycle;
pub mod logging;
mod network;
pub mod policy;
pub mod prelude;
pub mod request_id;
pub mod revalidate;
pub mod store;

pub use error::CacheError;
pub use fingerprint::Fingerprint;
pub use layer::{OfflineLayer, OfflineService};
pub use lifecycle::{OfflineCache, OfflineCacheBuilder, PrecacheManifest};
pub use logging::{CacheEvent, CacheEventType, LoggingConfig};
pub use policy::{RequestClass, RoutePolicy};
pub use request_id::RequestId;
