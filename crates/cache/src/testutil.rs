//! Shared test utilities for cache backend testing.
//!
//! Feature-gated behind `testutil` so none of this leaks into production
//! builds. Enable it from `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! geogate-cache = { path = "../cache", features = ["testutil"] }
//! ```
//!
//! The main helper is [`FlakyBackend`], a distributed-cache stand-in that can
//! be switched "down" or slowed past the operation timeout, which is what the
//! fallback and flow tests need to exercise degraded mode.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    backend::CacheBackend,
    error::{CacheError, CacheResult},
    health::HealthStatus,
    memory::MemoryBackend,
};

/// Create a deterministic test key from a prefix and index.
///
/// Produces keys like `"prefix:000042"`.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}:{idx:06}").into_bytes()
}

/// A controllable stand-in for a distributed cache.
///
/// Wraps a [`MemoryBackend`] and can be made to fail every call with a
/// connection error ([`set_down`](Self::set_down)) or to stall each call
/// ([`set_latency`](Self::set_latency)). Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    down: Arc<AtomicBool>,
    latency: Arc<Mutex<Option<Duration>>>,
    calls: Arc<AtomicU64>,
}

impl FlakyBackend {
    /// Creates a healthy backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (`true`) or succeed (`false`).
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Delays every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Removes any configured latency.
    pub fn clear_latency(&self) {
        *self.latency.lock() = None;
    }

    /// Number of calls received, including failed ones.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// The backing store, bypassing failure injection.
    #[must_use]
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    async fn enter(&self) -> CacheResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::connection("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FlakyBackend {
    async fn get(&self, key: &[u8]) -> CacheResult<Option<Bytes>> {
        self.enter().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.enter().await?;
        self.inner.set(key, value, ttl).await
    }

    async fn take(&self, key: &[u8]) -> CacheResult<Option<Bytes>> {
        self.enter().await?;
        self.inner.take(key).await
    }

    async fn delete(&self, key: &[u8]) -> CacheResult<()> {
        self.enter().await?;
        self.inner.delete(key).await
    }

    async fn increment(&self, key: &[u8], delta: i64, ttl: Duration) -> CacheResult<i64> {
        self.enter().await?;
        self.inner.increment(key, delta, ttl).await
    }

    async fn health_check(&self) -> CacheResult<HealthStatus> {
        self.enter().await?;
        self.inner.health_check().await
    }
}

/// Assert that a [`CacheResult`] is `Ok`, returning the inner value.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use geogate_cache::{assert_cache_ok, CacheResult};
///
/// let result: CacheResult<i64> = Ok(3);
/// assert_eq!(assert_cache_ok!(result), 3);
/// ```
#[macro_export]
macro_rules! assert_cache_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got CacheError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got CacheError: {e:?}", $msg),
        }
    };
}

/// Assert that a [`CacheResult`] is a transient error (connection or timeout).
#[macro_export]
macro_rules! assert_transient {
    ($result:expr) => {
        match &$result {
            Err(e) => assert!(e.is_transient(), "expected transient CacheError, got: {e:?}"),
            Ok(_) => panic!("expected transient CacheError, got Ok"),
        }
    };
}

/// Assert that a [`CacheResult`] is [`CacheError::CapacityExceeded`].
#[macro_export]
macro_rules! assert_capacity_exceeded {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::CacheError::CapacityExceeded { .. })),
            "expected CacheError::CapacityExceeded, got: {:?}",
            $result,
        );
    };
}
