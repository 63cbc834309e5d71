use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use super::{CacheBackend, CacheEntry, CacheStorage};
use crate::codec::{BincodeCodec, CacheCodec};
use crate::error::CacheError;

/// Named stores kept in Redis.
///
/// Layout under the namespace `ns`:
/// - `ns:stores`: set of store names.
/// - `ns:store:<name>:<fingerprint>`: encoded entry.
/// - `ns:store:<name>:index`: set of fingerprints held by the store, used to
///   delete a whole store.
#[derive(Clone)]
pub struct RedisStorage<C = BincodeCodec> {
    connection: Arc<Mutex<ConnectionManager>>,
    namespace: String,
    codec: C,
}

impl RedisStorage<BincodeCodec> {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection: Arc::new(Mutex::new(connection)),
            namespace: "tower_offline_cache".to_owned(),
            codec: BincodeCodec,
        }
    }
}

impl<C> RedisStorage<C> {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_codec<NC>(self, codec: NC) -> RedisStorage<NC> {
        RedisStorage {
            connection: self.connection,
            namespace: self.namespace,
            codec,
        }
    }

    fn registry_key(&self) -> String {
        format!("{}:stores", self.namespace)
    }

    fn store_prefix(&self, name: &str) -> String {
        format!("{}:store:{}", self.namespace, name)
    }
}

#[async_trait]
impl<C> CacheStorage for RedisStorage<C>
where
    C: CacheCodec,
{
    type Backend = RedisBackend<C>;

    async fn open(&self, name: &str) -> Result<RedisBackend<C>, CacheError> {
        let mut conn = self.connection.lock().await;
        let _: i64 = conn.sadd(self.registry_key(), name).await?;
        Ok(RedisBackend {
            connection: self.connection.clone(),
            prefix: self.store_prefix(name),
            codec: self.codec.clone(),
        })
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection.lock().await;
        let mut names: Vec<String> = conn.smembers(self.registry_key()).await?;
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let prefix = self.store_prefix(name);
        let index = format!("{prefix}:index");

        let mut conn = self.connection.lock().await;
        let removed: i64 = conn.srem(self.registry_key(), name).await?;
        let fingerprints: Vec<String> = conn.smembers(&index).await?;

        let mut doomed: Vec<String> = fingerprints
            .iter()
            .map(|fingerprint| format!("{prefix}:{fingerprint}"))
            .collect();
        doomed.push(index);
        let _: i64 = conn.del(doomed).await?;

        Ok(removed > 0)
    }
}

/// One store inside a [`RedisStorage`].
#[derive(Clone)]
pub struct RedisBackend<C = BincodeCodec> {
    connection: Arc<Mutex<ConnectionManager>>,
    prefix: String,
    codec: C,
}

impl<C> RedisBackend<C> {
    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    fn index_key(&self) -> String {
        format!("{}:index", self.prefix)
    }
}

#[async_trait]
impl<C> CacheBackend for RedisBackend<C>
where
    C: CacheCodec,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.connection.lock().await;
        let data: Option<Vec<u8>> = conn.get(self.make_key(key)).await?;
        data.map(|bytes| self.codec.decode(&bytes)).transpose()
    }

    async fn put(&self, key: String, entry: CacheEntry) -> Result<(), CacheError> {
        let bytes = self.codec.encode(&entry)?;

        let mut conn = self.connection.lock().await;
        redis::pipe()
            .atomic()
            .set(self.make_key(&key), bytes)
            .ignore()
            .sadd(self.index_key(), &key)
            .ignore()
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }
}
