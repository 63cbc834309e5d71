//! Re-exports for consumers who prefer a single import.
//!
//! ```no_run
//! use tower_offline_cache::prelude::*;
//! let cache = OfflineCache::builder(InMemoryStorage::default())
//!     .version("app-v1")
//!     .policy(RoutePolicy::default().with_media_prefix("/assets/media/"))
//!     .build();
//! # drop(cache);
//! ```

pub use crate::backend::memory::{InMemoryBackend, InMemoryStorage};
#[cfg(feature = "redis-backend")]
pub use crate::backend::redis::{RedisBackend, RedisStorage};
pub use crate::backend::{CacheBackend, CacheEntry, CacheStorage};
pub use crate::codec::{BincodeCodec, CacheCodec};
pub use crate::error::CacheError;
pub use crate::fingerprint::Fingerprint;
pub use crate::generation::GenerationManager;
pub use crate::layer::{OfflineLayer, OfflineService};
pub use crate::lifecycle::{OfflineCache, OfflineCacheBuilder, PrecacheManifest};
pub use crate::logging::{CacheEvent, CacheEventType, LoggingConfig};
pub use crate::policy::{RequestClass, RoutePolicy};
pub use crate::revalidate::{RevalidateConfig, Revalidator};
pub use crate::store::Store;
