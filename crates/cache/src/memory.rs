//! Process-local cache backend.
//!
//! [`MemoryBackend`] is the store that [`FallbackBackend`](crate::FallbackBackend)
//! switches to when the distributed backend is unreachable. It is also the
//! natural backend for tests and single-process deployments.
//!
//! # Design
//!
//! - **One lock**: a single [`parking_lot::Mutex`] guards the whole key space.
//!   `take` and `increment` hold it across their read-modify-write, which is
//!   what makes them atomic.
//! - **Lazy expiry**: every entry carries an explicit expiry instant that is
//!   checked on access. There is no background cleanup task; expired entries
//!   are purged when a new key would otherwise exceed capacity.
//! - **Bounded**: at most `capacity` live entries. A write that would exceed
//!   the bound fails with [`CacheError::CapacityExceeded`] rather than evicting
//!   a live entry.
//!
//! Expiry uses [`tokio::time::Instant`], so tests can drive TTLs with a paused
//! clock.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    backend::CacheBackend,
    error::{CacheError, CacheResult},
    health::HealthStatus,
};

/// Default maximum number of live entries in a [`MemoryBackend`].
pub const DEFAULT_LOCAL_CAPACITY: usize = 10_000;

/// Expiry used when `now + ttl` does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug)]
struct Store {
    entries: HashMap<Vec<u8>, Entry>,
    capacity: usize,
}

impl Store {
    /// Returns the live entry for `key`, dropping it if it has expired.
    fn live(&mut self, key: &[u8], now: Instant) -> Option<&Entry> {
        let expired = self.entries.get(key).is_some_and(|entry| !entry.is_live(now));
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key)
    }

    /// Makes room for one more key, purging expired entries if needed.
    fn reserve(&mut self, key: &[u8], now: Instant) -> CacheResult<()> {
        if self.entries.contains_key(key) || self.entries.len() < self.capacity {
            return Ok(());
        }
        self.entries.retain(|_, entry| entry.is_live(now));
        if self.entries.len() < self.capacity {
            Ok(())
        } else {
            Err(CacheError::CapacityExceeded { capacity: self.capacity })
        }
    }
}

/// In-memory cache backend with lazy expiry.
///
/// `MemoryBackend` is cheaply cloneable; all clones share the same store.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    store: Arc<Mutex<Store>>,
}

impl MemoryBackend {
    /// Creates a backend bounded to [`DEFAULT_LOCAL_CAPACITY`] entries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOCAL_CAPACITY)
    }

    /// Creates a backend bounded to `capacity` live entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store { entries: HashMap::new(), capacity: capacity.max(1) })),
        }
    }

    /// Returns the number of stored entries, including expired entries that
    /// have not been purged yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().entries.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.store.lock().entries.clear();
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, key: &[u8]) -> CacheResult<Option<Bytes>> {
        let mut store = self.store.lock();
        Ok(store.live(key, Instant::now()).map(|entry| entry.value.clone()))
    }

    #[tracing::instrument(level = "trace", skip_all, fields(ttl_ms = ttl.as_millis() as u64))]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        let mut store = self.store.lock();
        store.reserve(&key, now)?;
        store.entries.insert(key, Entry { value: Bytes::from(value), expires_at: deadline(now, ttl) });
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn take(&self, key: &[u8]) -> CacheResult<Option<Bytes>> {
        let now = Instant::now();
        let mut store = self.store.lock();
        // Check and delete under the same guard.
        Ok(store.entries.remove(key).filter(|entry| entry.is_live(now)).map(|entry| entry.value))
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn delete(&self, key: &[u8]) -> CacheResult<()> {
        self.store.lock().entries.remove(key);
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip_all, fields(delta = delta, ttl_ms = ttl.as_millis() as u64))]
    async fn increment(&self, key: &[u8], delta: i64, ttl: Duration) -> CacheResult<i64> {
        let now = Instant::now();
        let mut store = self.store.lock();

        let (count, expires_at) = match store.live(key, now) {
            Some(entry) => {
                let current = parse_counter(&entry.value)?;
                let next = current
                    .checked_add(delta)
                    .ok_or_else(|| CacheError::internal("counter overflow"))?;
                (next, entry.expires_at)
            },
            None => {
                store.reserve(key, now)?;
                (delta, deadline(now, ttl))
            },
        };

        store
            .entries
            .insert(key.to_vec(), Entry { value: Bytes::from(count.to_string()), expires_at });
        Ok(count)
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn health_check(&self) -> CacheResult<HealthStatus> {
        let started = Instant::now();
        let (entries, capacity) = {
            let store = self.store.lock();
            (store.entries.len(), store.capacity)
        };
        Ok(HealthStatus::healthy("memory", started.elapsed())
            .with_detail("entry_count", entries.to_string())
            .with_detail("capacity", capacity.to_string()))
    }
}

fn parse_counter(value: &[u8]) -> CacheResult<i64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| CacheError::serialization("value is not an integer counter"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use tokio::{task::JoinSet, time::advance};

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn set_get_delete() {
        let backend = MemoryBackend::new();

        backend.set(b"key".to_vec(), b"value".to_vec(), MINUTE).await.unwrap();
        assert_eq!(backend.get(b"key").await.unwrap(), Some(Bytes::from("value")));

        backend.delete(b"key").await.unwrap();
        assert_eq!(backend.get(b"key").await.unwrap(), None);

        // Deleting again is a no-op.
        backend.delete(b"key").await.unwrap();
    }

    #[tokio::test]
    async fn take_returns_value_once() {
        let backend = MemoryBackend::new();
        backend.set(b"token".to_vec(), b"record".to_vec(), MINUTE).await.unwrap();

        assert_eq!(backend.take(b"token").await.unwrap(), Some(Bytes::from("record")));
        assert_eq!(backend.take(b"token").await.unwrap(), None);
        assert_eq!(backend.get(b"token").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_read_as_absent() {
        let backend = MemoryBackend::new();
        backend.set(b"short".to_vec(), b"v".to_vec(), Duration::from_secs(5)).await.unwrap();

        advance(Duration::from_secs(4)).await;
        assert!(backend.get(b"short").await.unwrap().is_some());

        advance(Duration::from_secs(1)).await;
        assert_eq!(backend.get(b"short").await.unwrap(), None);
        assert_eq!(backend.take(b"short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_ttl_is_immediately_expired() {
        let backend = MemoryBackend::new();
        backend.set(b"ghost".to_vec(), b"v".to_vec(), Duration::ZERO).await.unwrap();
        assert_eq!(backend.get(b"ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites_value_and_ttl() {
        let backend = MemoryBackend::new();
        backend.set(b"k".to_vec(), b"old".to_vec(), Duration::ZERO).await.unwrap();
        backend.set(b"k".to_vec(), b"new".to_vec(), MINUTE).await.unwrap();
        assert_eq!(backend.get(b"k").await.unwrap(), Some(Bytes::from("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn increment_sets_ttl_only_on_creation() {
        let backend = MemoryBackend::new();

        assert_eq!(backend.increment(b"ctr", 1, Duration::from_secs(10)).await.unwrap(), 1);
        advance(Duration::from_secs(6)).await;

        // A later increment with a longer TTL must not extend the window.
        assert_eq!(backend.increment(b"ctr", 1, Duration::from_secs(100)).await.unwrap(), 2);
        advance(Duration::from_secs(4)).await;

        assert_eq!(backend.get(b"ctr").await.unwrap(), None);
        assert_eq!(backend.increment(b"ctr", 1, Duration::from_secs(10)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unbounded_ttl_is_clamped() {
        let backend = MemoryBackend::new();
        backend.set(b"k".to_vec(), b"v".to_vec(), Duration::MAX).await.unwrap();
        assert_eq!(backend.get(b"k").await.unwrap(), Some(Bytes::from_static(b"v")));

        assert_eq!(backend.increment(b"n", 1, Duration::MAX).await.unwrap(), 1);
        assert_eq!(backend.increment(b"n", 1, Duration::MAX).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn increment_rejects_non_counter_values() {
        let backend = MemoryBackend::new();
        backend.set(b"text".to_vec(), b"hello".to_vec(), MINUTE).await.unwrap();

        let result = backend.increment(b"text", 1, MINUTE).await;
        assert!(matches!(result, Err(CacheError::Serialization { .. })));
    }

    #[tokio::test]
    async fn capacity_purges_expired_before_rejecting() {
        let backend = MemoryBackend::with_capacity(2);
        backend.set(b"a".to_vec(), b"1".to_vec(), Duration::ZERO).await.unwrap();
        backend.set(b"b".to_vec(), b"2".to_vec(), MINUTE).await.unwrap();

        // "a" is expired, so there is room after a purge.
        backend.set(b"c".to_vec(), b"3".to_vec(), MINUTE).await.unwrap();
        assert_eq!(backend.len(), 2);

        let result = backend.set(b"d".to_vec(), b"4".to_vec(), MINUTE).await;
        assert!(matches!(result, Err(CacheError::CapacityExceeded { capacity: 2 })));

        // Overwriting an existing key never needs room.
        backend.set(b"b".to_vec(), b"22".to_vec(), MINUTE).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_take_has_exactly_one_winner() {
        let backend = MemoryBackend::new();

        for round in 0..20 {
            let key = format!("race:{round}").into_bytes();
            backend.set(key.clone(), b"prize".to_vec(), MINUTE).await.unwrap();

            let mut set = JoinSet::new();
            for _ in 0..16 {
                let backend = backend.clone();
                let key = key.clone();
                set.spawn(async move { backend.take(&key).await.unwrap() });
            }

            let mut winners = 0;
            while let Some(result) = set.join_next().await {
                if result.unwrap().is_some() {
                    winners += 1;
                }
            }
            assert_eq!(winners, 1, "round {round}: exactly one take should win");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let backend = MemoryBackend::new();

        let mut set = JoinSet::new();
        for _ in 0..8 {
            let backend = backend.clone();
            set.spawn(async move {
                for _ in 0..25 {
                    backend.increment(b"hits", 1, MINUTE).await.unwrap();
                }
            });
        }
        while let Some(result) = set.join_next().await {
            result.unwrap();
        }

        assert_eq!(backend.get(b"hits").await.unwrap(), Some(Bytes::from("200")));
    }

    #[tokio::test]
    async fn health_reports_entry_count() {
        let backend = MemoryBackend::with_capacity(8);
        backend.set(b"k".to_vec(), b"v".to_vec(), MINUTE).await.unwrap();

        let status = backend.health_check().await.unwrap();
        assert!(status.is_healthy());
        assert_eq!(status.detail("entry_count"), Some("1"));
        assert_eq!(status.detail("capacity"), Some("8"));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let a = MemoryBackend::new();
        let b = a.clone();
        a.set(b"k".to_vec(), b"v".to_vec(), MINUTE).await.unwrap();
        assert_eq!(b.get(b"k").await.unwrap(), Some(Bytes::from("v")));
        b.clear();
        assert!(a.is_empty());
    }
}
