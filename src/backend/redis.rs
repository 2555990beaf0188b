use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{CacheBackend, CacheEntry};
use crate::codec::{BincodeCodec, CacheCodec};
use crate::error::CacheError;

/// A [`CacheBackend`] storing encoded entries in Redis.
///
/// Keys are prefixed with a namespace and written with `SET EX`, so Redis
/// enforces the TTL. Sub-second TTLs are rounded up to one second and a zero
/// TTL stores nothing.
#[derive(Clone)]
pub struct RedisBackend<C = BincodeCodec> {
    connection: ConnectionManager,
    namespace: String,
    codec: C,
}

impl RedisBackend<BincodeCodec> {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            namespace: "http_cacheable".to_owned(),
            codec: BincodeCodec,
        }
    }
}

impl<C> RedisBackend<C> {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_codec<NC>(self, codec: NC) -> RedisBackend<NC> {
        RedisBackend {
            connection: self.connection,
            namespace: self.namespace,
            codec,
        }
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl<C> CacheBackend for RedisBackend<C>
where
    C: CacheCodec,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.connection.clone();
        let data: Option<Vec<u8>> = conn.get(self.make_key(key)).await?;

        data.map(|bytes| self.codec.decode(&bytes)).transpose()
    }

    async fn set(&self, key: String, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }

        let payload = self.codec.encode(&entry)?;
        let ttl_secs = ttl_seconds(ttl);

        let mut conn = self.connection.clone();
        let _: () = conn.set_ex(self.make_key(&key), payload, ttl_secs).await?;
        Ok(())
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs.max(1)
    }
}
