//! Cache backend trait definition.
//!
//! [`CacheBackend`] is the single key/value abstraction the rest of geogate is
//! built on. Token issuance and redemption, and rate-limit counters, are all
//! expressed as operations on this trait.
//!
//! # Semantics every backend must honor
//!
//! - Keys and values are bytes. Serialization is the caller's concern (the
//!   `*_json` helpers cover the common case).
//! - Every entry carries a TTL. Reads after the TTL has elapsed behave exactly
//!   as if the key were absent, regardless of whether the backend has
//!   physically removed the entry yet.
//! - [`take`](CacheBackend::take) is an atomic get-and-delete. With N callers
//!   racing on the same key, exactly one receives the value.
//! - [`increment`](CacheBackend::increment) is atomic and only sets the TTL
//!   when it creates the key.
//!
//! # Implementations
//!
//! | Backend | Role |
//! |---------|------|
//! | [`MemoryBackend`](crate::MemoryBackend) | Process-local store, used as the fallback |
//! | [`FallbackBackend`](crate::FallbackBackend) | Distributed store with automatic local fallback |
//! | `RedisBackend` (in `geogate-cache-redis`) | Distributed store |

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::{error::CacheResult, health::HealthStatus};

/// Abstract key/value cache with expiry and atomic take/increment.
///
/// Backends are expected to be thread-safe (`Send + Sync`) and to support
/// concurrent operations from many request handlers.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use bytes::Bytes;
/// use geogate_cache::{CacheBackend, MemoryBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let cache = MemoryBackend::new();
///
/// cache.set(b"token:abc".to_vec(), b"record".to_vec(), Duration::from_secs(60)).await.unwrap();
/// assert_eq!(cache.take(b"token:abc").await.unwrap(), Some(Bytes::from("record")));
/// assert_eq!(cache.take(b"token:abc").await.unwrap(), None);
/// # });
/// ```
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` if the key is missing or its TTL has elapsed.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> CacheResult<Option<Bytes>>;

    /// Stores a value that expires after `ttl`, overwriting any existing
    /// value and TTL.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Atomically retrieves and deletes a value.
    ///
    /// Under concurrent callers racing on the same key, exactly one observes
    /// `Some(value)`; every other caller observes `None`. An expired entry is
    /// treated as absent.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn take(&self, key: &[u8]) -> CacheResult<Option<Bytes>>;

    /// Deletes a key. Deleting a missing key is a no-op.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> CacheResult<()>;

    /// Atomically adds `delta` to the counter at `key` and returns the new
    /// value.
    ///
    /// If the key does not exist (or has expired) it is created with value
    /// `delta` and the given `ttl`. If it exists, its TTL is left untouched.
    #[must_use = "cache operations may fail and errors must be handled"]
    async fn increment(&self, key: &[u8], delta: i64, ttl: Duration) -> CacheResult<i64>;

    /// Reports backend health.
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self) -> CacheResult<HealthStatus>;

    /// Serializes `value` as JSON and stores it with `ttl`.
    async fn set_json<T>(&self, key: Vec<u8>, value: &T, ttl: Duration) -> CacheResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, ttl).await
    }

    /// Retrieves and deserializes a JSON value.
    async fn get_json<T>(&self, key: &[u8]) -> CacheResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Atomically takes and deserializes a JSON value.
    ///
    /// The entry is removed even if it fails to deserialize.
    async fn take_json<T>(&self, key: &[u8]) -> CacheResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.take(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
