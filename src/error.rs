use thiserror::Error;

/// Errors raised by the offline cache and its storage backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The persistent medium behind a store failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// A pre-seed locator could not be fetched or did not answer `200 OK`.
    #[error("precache failed for {locator}: {reason}")]
    Precache { locator: String, reason: String },

    /// A network fetch did not complete within the configured timeout.
    #[error("network fetch timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The cache was configured with values it cannot run with.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A locator or origin could not be turned into a request URI.
    #[error("invalid locator `{locator}`: {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[cfg(feature = "redis-backend")]
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}
