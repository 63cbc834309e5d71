//! Structured cache events.
//!
//! Every decision the layer takes can be emitted as one JSON event on the
//! `tower_offline_cache::events` tracing target. Events are off by default,
//! sampled, and never influence how a request is answered.

use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::SystemTime;

use crate::policy::RequestClass;
use crate::request_id::RequestId;

/// Configuration for structured event logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit structured events
    pub enabled: bool,

    /// Sample rate (1.0 = every event, 0.1 = 10%)
    pub sample_rate: f64,

    /// Hash fingerprints so URLs do not land in logs
    pub hash_keys: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: 1.0,
            hash_keys: true,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the sample rate, clamped to `0.0..=1.0`.
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_hash_keys(mut self, hash: bool) -> Self {
        self.hash_keys = hash;
        self
    }

    /// Checks if an event should be emitted based on the sample rate.
    pub fn should_sample(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.sample_rate >= 1.0 {
            return true;
        }
        use std::collections::hash_map::RandomState;
        use std::hash::BuildHasher;

        let random = (RandomState::new().hash_one(SystemTime::now()) as f64) / (u64::MAX as f64);
        random < self.sample_rate
    }
}

/// What happened to a request or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventType {
    /// Request passed through without touching the store
    Bypass,
    /// Answered from the store
    Hit,
    /// No stored entry; answered from the network
    Miss,
    /// Network response written to the store
    Store,
    /// Network response not stored (status other than 200)
    StoreSkipped,
    /// Background revalidation stored a fresh entry
    Revalidate,
    /// Background revalidation failed and was discarded
    RevalidateFailed,
    /// Store pre-seeded at install
    Precache,
    /// Superseded store generation deleted
    GenerationDeleted,
}

impl CacheEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEventType::Bypass => "bypass",
            CacheEventType::Hit => "hit",
            CacheEventType::Miss => "miss",
            CacheEventType::Store => "store",
            CacheEventType::StoreSkipped => "store_skipped",
            CacheEventType::Revalidate => "revalidate",
            CacheEventType::RevalidateFailed => "revalidate_failed",
            CacheEventType::Precache => "precache",
            CacheEventType::GenerationDeleted => "generation_deleted",
        }
    }
}

/// One structured cache event.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub timestamp: SystemTime,
    pub event_type: CacheEventType,
    /// Fingerprint or store name the event is about (may be hashed on output)
    pub key: String,
    pub request_id: Option<RequestId>,
    pub class: Option<RequestClass>,
    pub method: Option<Method>,
    pub status: Option<StatusCode>,
    /// Free-form detail, e.g. an error message
    pub detail: Option<String>,
}

impl CacheEvent {
    pub fn new(event_type: CacheEventType, key: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            key: key.into(),
            request_id: None,
            class: None,
            method: None,
            status: None,
            detail: None,
        }
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn with_class(mut self, class: RequestClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Renders the event as a JSON value.
    pub fn to_json(&self, config: &LoggingConfig) -> serde_json::Value {
        let key = if config.hash_keys {
            hash_key(&self.key)
        } else {
            self.key.clone()
        };

        json!({
            "timestamp": chrono::DateTime::<chrono::Utc>::from(self.timestamp)
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
            "event": self.event_type.as_str(),
            "key": key,
            "request_id": self.request_id.as_ref().map(RequestId::as_str),
            "class": self.class.map(|class| class.as_str()),
            "method": self.method.as_ref().map(Method::as_str),
            "status": self.status.map(|status| status.as_u16()),
            "detail": self.detail,
        })
    }

    /// Emits this event if `config` enables and samples it. Without the
    /// `tracing` feature events are dropped.
    #[cfg(feature = "tracing")]
    pub fn log(&self, config: &LoggingConfig) {
        if !config.should_sample() {
            return;
        }

        let data = self.to_json(config);
        tracing::info!(target: "tower_offline_cache::events", event = %data);
    }

    #[cfg(not(feature = "tracing"))]
    pub fn log(&self, _config: &LoggingConfig) {}
}

/// Hashes a key using SHA-256.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
