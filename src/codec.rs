//! Byte encodings for stored entries, used by out-of-process backends.

use bytes::Bytes;
use http::{StatusCode, Version};
use serde::{Deserialize, Serialize};

use crate::backend::CacheEntry;
use crate::error::CacheError;

/// Serialization strategy for cached entries.
pub trait CacheCodec: Send + Sync + Clone + 'static {
    fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CacheError>;
    fn decode(&self, bytes: &[u8]) -> Result<CacheEntry, CacheError>;
}

/// Default [`CacheCodec`] implementation backed by `bincode`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

#[derive(Serialize, Deserialize)]
struct EncodedEntry {
    status: u16,
    version: u8,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
}

impl CacheCodec for BincodeCodec {
    fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
        let encoded = EncodedEntry {
            status: entry.status.as_u16(),
            version: version_to_u8(entry.version),
            headers: entry.headers.clone(),
            body: entry.body.to_vec(),
        };

        bincode::serialize(&encoded).map_err(|err| CacheError::Backend(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<CacheEntry, CacheError> {
        let encoded: EncodedEntry =
            bincode::deserialize(bytes).map_err(|err| CacheError::Backend(err.to_string()))?;
        let status = StatusCode::from_u16(encoded.status)
            .map_err(|err| CacheError::Backend(err.to_string()))?;
        Ok(CacheEntry::new(
            status,
            version_from_u8(encoded.version)?,
            encoded.headers,
            Bytes::from(encoded.body),
        ))
    }
}

fn version_to_u8(version: Version) -> u8 {
    match version {
        Version::HTTP_09 => 0,
        Version::HTTP_10 => 1,
        Version::HTTP_2 => 3,
        Version::HTTP_3 => 4,
        _ => 2,
    }
}

fn version_from_u8(value: u8) -> Result<Version, CacheError> {
    match value {
        0 => Ok(Version::HTTP_09),
        1 => Ok(Version::HTTP_10),
        2 => Ok(Version::HTTP_11),
        3 => Ok(Version::HTTP_2),
        4 => Ok(Version::HTTP_3),
        other => Err(CacheError::Backend(format!(
            "unknown HTTP version tag {other}"
        ))),
    }
}
