//! [`RedisBackend`]: the distributed [`CacheBackend`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use geogate_cache::{CacheBackend, CacheConfig, CacheResult, HealthStatus};
use redis::{Client, Script, aio::ConnectionManager};
use tokio::time::Instant;

use crate::{
    error::{RedisCacheError, Result, redis_error_to_cache_error},
    keys::namespaced,
};

/// Increments `KEYS[1]` by `ARGV[1]` and sets a `ARGV[2]` millisecond expiry
/// only if the increment created the key.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCRBY', KEYS[1], ARGV[1])
if count == tonumber(ARGV[1]) then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return count
";

/// Redis implementation of [`CacheBackend`].
///
/// | CacheBackend | Redis |
/// |--------------|-------|
/// | `set` | `SET key value PX ttl` |
/// | `get` | `GET key` |
/// | `take` | `GETDEL key` (single atomic command) |
/// | `delete` | `DEL key` |
/// | `increment` | Lua: `INCRBY`, then `PEXPIRE` only on creation |
/// | `health_check` | `PING` |
///
/// The [`ConnectionManager`] is shared by all clones and reconnects on its
/// own after a dropped connection. This backend applies no timeout of its
/// own to individual commands; wrap it in
/// [`FallbackBackend`](geogate_cache::FallbackBackend) for that.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    key_prefix: Arc<[u8]>,
    increment: Arc<Script>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("key_prefix", &String::from_utf8_lossy(&self.key_prefix))
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connects to the Redis server at `config.url()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the URL cannot be
    /// parsed, or the connection is not established within
    /// `config.connect_timeout()`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// // Requires a running Redis server.
    /// use geogate_cache::{CacheConfig, FallbackBackend};
    /// use geogate_cache_redis::RedisBackend;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = CacheConfig::builder().url("redis://127.0.0.1:6379").build()?;
    /// let redis = RedisBackend::connect(&config).await?;
    /// let cache = FallbackBackend::new(redis, &config)?;
    /// # Ok(())
    /// # }
    /// ```
    #[tracing::instrument(skip(config), fields(connect_timeout_ms = config.connect_timeout().as_millis() as u64))]
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::open(config.url())?;

        let connection = tokio::time::timeout(config.connect_timeout(), client.get_connection_manager())
            .await
            .map_err(|_| RedisCacheError::ConnectTimeout(config.connect_timeout()))??;

        tracing::info!(key_prefix = config.key_prefix(), "connected to Redis");
        Ok(Self::from_connection(connection, config.key_prefix()))
    }

    /// Wraps an existing connection manager.
    #[must_use]
    pub fn from_connection(connection: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            connection,
            key_prefix: Arc::from(key_prefix.as_bytes()),
            increment: Arc::new(Script::new(INCREMENT_SCRIPT)),
        }
    }

    /// The namespace prepended to every key.
    #[must_use]
    pub fn key_prefix(&self) -> &[u8] {
        &self.key_prefix
    }

    fn key(&self, key: &[u8]) -> Vec<u8> {
        namespaced(&self.key_prefix, key)
    }
}

/// Redis rejects a zero `PX`; expiry is at least one millisecond.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    #[tracing::instrument(skip_all)]
    async fn get(&self, key: &[u8]) -> CacheResult<Option<Bytes>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(redis_error_to_cache_error)?;
        Ok(value.map(Bytes::from))
    }

    #[tracing::instrument(skip_all, fields(ttl_ms = ttl.as_millis() as u64))]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        if ttl.is_zero() {
            // Already expired: make sure no older value survives.
            let _: i64 = redis::cmd("DEL")
                .arg(self.key(&key))
                .query_async(&mut conn)
                .await
                .map_err(redis_error_to_cache_error)?;
            return Ok(());
        }

        let _: () = redis::cmd("SET")
            .arg(self.key(&key))
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(redis_error_to_cache_error)?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn take(&self, key: &[u8]) -> CacheResult<Option<Bytes>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GETDEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(redis_error_to_cache_error)?;
        Ok(value.map(Bytes::from))
    }

    #[tracing::instrument(skip_all)]
    async fn delete(&self, key: &[u8]) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(redis_error_to_cache_error)?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(delta = delta, ttl_ms = ttl.as_millis() as u64))]
    async fn increment(&self, key: &[u8], delta: i64, ttl: Duration) -> CacheResult<i64> {
        let mut conn = self.connection.clone();
        let count: i64 = self
            .increment
            .key(self.key(key))
            .arg(delta)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error_to_cache_error)?;
        Ok(count)
    }

    #[tracing::instrument(skip_all)]
    async fn health_check(&self) -> CacheResult<HealthStatus> {
        let started = Instant::now();
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(redis_error_to_cache_error)?;

        let elapsed = started.elapsed();
        if pong == "PONG" {
            Ok(HealthStatus::healthy("redis", elapsed))
        } else {
            Ok(HealthStatus::unhealthy("redis", elapsed, format!("unexpected PING reply: {pong}")))
        }
    }
}
