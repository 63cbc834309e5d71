//! Store generation rollover.

#[cfg(feature = "tracing")]
use tracing::{debug, info};

use crate::backend::CacheStorage;
use crate::error::CacheError;

/// Keeps exactly one store generation alive: the one named `current`.
#[derive(Clone)]
pub struct GenerationManager<St> {
    storage: St,
    current: String,
}

impl<St> GenerationManager<St>
where
    St: CacheStorage,
{
    pub fn new(storage: St, current: impl Into<String>) -> Self {
        Self {
            storage,
            current: current.into(),
        }
    }

    /// Deletes every store whose name differs from the current version.
    ///
    /// Deletions run one after another; the first failure aborts the run and
    /// is returned. Returns the names that were deleted.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(current = %self.current))
    )]
    pub async fn reconcile(&self) -> Result<Vec<String>, CacheError> {
        let mut deleted = Vec::new();

        for name in self.storage.keys().await? {
            if name == self.current {
                continue;
            }
            if self.storage.delete(&name).await? {
                #[cfg(feature = "tracing")]
                debug!(store = %name, "deleted superseded store");
                deleted.push(name);
            }
        }

        #[cfg(feature = "tracing")]
        info!(deleted = deleted.len(), "store generations reconciled");

        Ok(deleted)
    }
}
