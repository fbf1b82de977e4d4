//! Redis-backed [`CacheStore`].

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use bazaar_pipeline::{CacheError, CacheStore};

/// Cache store over a multiplexed, auto-reconnecting Redis connection.
///
/// Values are stored as raw bytes with `SET key value EX ttl`.
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: ConnectionManager,
}

impl RedisCacheStore {
    /// Connect to `redis_url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url).map_err(classify)?;
        let conn = ConnectionManager::new(client).await.map_err(classify)?;
        info!(url = %redis_url, "connected to redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(classify)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let () = conn.set_ex(key, value, ttl_seconds(ttl)).await.map_err(classify)?;
        debug!(key, ttl_secs = ttl_seconds(ttl), "cache entry written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _removed: u64 = conn.del(key).await.map_err(classify)?;
        Ok(())
    }
}

/// `EX` only takes whole seconds and rejects 0; round up.
fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

fn classify(err: redis::RedisError) -> CacheError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        CacheError::Unavailable(err.to_string())
    } else {
        CacheError::Backend(err.to_string())
    }
}
