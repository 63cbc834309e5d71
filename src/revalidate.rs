//! Fire-and-forget background revalidation.
//!
//! A revalidation re-fetches one request and overwrites its store entry on
//! success. The triggering request never waits for it and never learns its
//! outcome: every result is discarded in [`Revalidator::spawn`], after a
//! diagnostic notice. Nothing is retried.
//!
//! Tasks run on the Tokio runtime. A semaphore bounds how many fetch at
//! once; triggers beyond the bound wait for a permit, so every trigger
//! eventually runs.

use std::future::Future;
use std::pin::{pin, Pin};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};

#[cfg(feature = "metrics")]
use metrics::counter;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

use crate::fingerprint::Fingerprint;
use crate::layer::BoxError;
use crate::logging::{CacheEvent, CacheEventType, LoggingConfig};

/// Future driving one revalidation.
pub type RevalidateFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

/// Configuration for background revalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevalidateConfig {
    /// Maximum revalidations fetching at once (default: 16)
    pub max_concurrent: usize,
}

impl Default for RevalidateConfig {
    fn default() -> Self {
        Self { max_concurrent: 16 }
    }
}

impl RevalidateConfig {
    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be at least 1".to_string());
        }
        if self.max_concurrent > Semaphore::MAX_PERMITS {
            return Err("max_concurrent is too large".to_string());
        }
        Ok(())
    }
}

/// Spawns bounded, unobserved revalidation tasks.
#[derive(Clone)]
pub struct Revalidator {
    permits: Arc<Semaphore>,
    pending: Arc<Pending>,
    events: LoggingConfig,
}

/// Count of spawned tasks that have not finished, queued ones included.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

/// Releases one pending slot when the task ends, even by panic.
struct PendingGuard(Arc<Pending>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl Revalidator {
    pub fn new(config: RevalidateConfig, events: LoggingConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            pending: Arc::new(Pending::default()),
            events,
        }
    }

    /// Runs `task` in the background for `key`.
    ///
    /// The task waits for a permit when `max_concurrent` revalidations are
    /// already fetching. Returns `false` only when no Tokio runtime is
    /// available to run it.
    pub fn spawn(&self, key: &Fingerprint, task: RevalidateFuture) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };

        #[cfg(feature = "metrics")]
        counter!("tower_offline_cache.revalidate.triggered").increment(1);

        self.pending.count.fetch_add(1, Ordering::AcqRel);
        let guard = PendingGuard(self.pending.clone());
        let permits = self.permits.clone();
        let key = key.clone();
        let events = self.events.clone();
        handle.spawn(async move {
            let _guard = guard;
            // The semaphore is never closed.
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let outcome = task.await;
            discard(&key, outcome, &events);
        });
        true
    }

    /// Number of revalidations queued or running.
    pub fn in_flight(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Waits until every revalidation spawned so far has finished.
    pub async fn drain(&self) {
        loop {
            let mut idle = pin!(self.pending.idle.notified());
            idle.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// The only place revalidation outcomes end up.
fn discard(key: &Fingerprint, outcome: Result<(), BoxError>, events: &LoggingConfig) {
    match outcome {
        Ok(()) => {
            #[cfg(feature = "metrics")]
            counter!("tower_offline_cache.revalidate.success").increment(1);

            #[cfg(feature = "tracing")]
            debug!(key = %key, "revalidated");

            CacheEvent::new(CacheEventType::Revalidate, key.as_str()).log(events);
        }
        Err(err) => {
            #[cfg(feature = "metrics")]
            counter!("tower_offline_cache.revalidate.error").increment(1);

            #[cfg(feature = "tracing")]
            warn!(key = %key, error = %err, "silent revalidation failed");

            CacheEvent::new(CacheEventType::RevalidateFailed, key.as_str())
                .with_detail(err.to_string())
                .log(events);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Uri;
    use std::time::Duration;

    fn key() -> Fingerprint {
        Fingerprint::of(&Uri::from_static("https://app.example/media/homehero.jpg")).unwrap()
    }

    fn revalidator(max_concurrent: usize) -> Revalidator {
        Revalidator::new(RevalidateConfig { max_concurrent }, LoggingConfig::default())
    }

    #[test]
    fn config_validation() {
        assert!(RevalidateConfig::default().validate().is_ok());
        assert!(RevalidateConfig { max_concurrent: 0 }.validate().is_err());
    }

    #[tokio::test]
    async fn spawned_task_runs_to_completion() {
        let revalidator = revalidator(4);
        let runs = Arc::new(AtomicUsize::new(0));

        let task_runs = runs.clone();
        assert!(revalidator.spawn(
            &key(),
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                task_runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        ));

        revalidator.drain().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(revalidator.in_flight(), 0);
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let revalidator = revalidator(1);
        assert!(revalidator.spawn(&key(), Box::pin(async { Err("offline".into()) })));
        revalidator.drain().await;

        // The permit came back, so a new task can start.
        assert!(revalidator.spawn(&key(), Box::pin(async { Ok(()) })));
        revalidator.drain().await;
    }

    #[tokio::test]
    async fn saturated_triggers_queue_until_a_permit_frees() {
        let revalidator = revalidator(1);
        let gate = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let waiter = gate.clone();
        let first_runs = runs.clone();
        assert!(revalidator.spawn(
            &key(),
            Box::pin(async move {
                waiter.notified().await;
                first_runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        ));
        for _ in 0..3 {
            let runs = runs.clone();
            assert!(revalidator.spawn(
                &key(),
                Box::pin(async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            ));
        }
        assert_eq!(revalidator.in_flight(), 4);

        // Let the first task take the only permit; the rest must wait for it.
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        gate.notify_one();
        revalidator.drain().await;
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert_eq!(revalidator.in_flight(), 0);
    }

    #[tokio::test]
    async fn drain_returns_immediately_when_idle() {
        revalidator(2).drain().await;
    }
}
