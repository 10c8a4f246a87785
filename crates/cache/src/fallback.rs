//! Distributed cache with automatic local fallback.
//!
//! [`FallbackBackend`] wraps a distributed [`CacheBackend`] (normally
//! `RedisBackend`) and a process-local [`MemoryBackend`]. Every operation is
//! attempted against the distributed store first, bounded by an operation
//! timeout. A transient failure or timeout trips the [`CircuitBreaker`] and the
//! operation is served from the local store instead; while the breaker is
//! open, traffic goes straight to the local store. After the cooldown a probe
//! is let through, and a successful probe returns traffic to the distributed
//! store.
//!
//! Callers never see the degradation as an error. It is reported through a
//! `warn` event carrying `backend_degraded = true`, through
//! [`FallbackBackend::is_degraded`], and through a
//! [`HealthState::Degraded`](crate::HealthState::Degraded) health status.
//!
//! Entries written while degraded live only in the local store and are not
//! copied back when the distributed store recovers. Single-use guarantees
//! hold per store, not across a failover.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use tokio::time::Instant;

use crate::{
    backend::CacheBackend,
    circuit_breaker::{CircuitBreaker, CircuitBreakerMetrics},
    config::CacheConfig,
    error::{CacheError, CacheResult, ConfigError},
    health::HealthStatus,
    memory::MemoryBackend,
};

/// Counters describing how often the local store has been used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackMetrics {
    /// Operations answered by the distributed store.
    pub primary_ops: u64,
    /// Operations answered by the local store.
    pub local_ops: u64,
    /// Distributed store failures that triggered a fallback.
    pub primary_failures: u64,
    /// Breaker counters.
    pub breaker: CircuitBreakerMetrics,
}

#[derive(Debug, Default)]
struct Counters {
    primary_ops: AtomicU64,
    local_ops: AtomicU64,
    primary_failures: AtomicU64,
}

/// A [`CacheBackend`] that degrades to a local store when the distributed
/// store is unreachable.
///
/// Cloning is cheap; clones share the breaker, the local store and the
/// counters.
#[derive(Debug, Clone)]
pub struct FallbackBackend<P> {
    primary: P,
    local: MemoryBackend,
    breaker: CircuitBreaker,
    op_timeout: Duration,
    counters: Arc<Counters>,
}

impl<P: CacheBackend> FallbackBackend<P> {
    /// Wraps `primary` using the timeouts, cooldown and local capacity from
    /// `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` is invalid.
    pub fn new(primary: P, config: &CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_parts(
            primary,
            MemoryBackend::with_capacity(config.local_capacity()),
            CircuitBreaker::new(config.circuit_breaker()?),
            config.op_timeout(),
        ))
    }

    /// Assembles a backend from explicit parts.
    #[must_use]
    pub fn from_parts(
        primary: P,
        local: MemoryBackend,
        breaker: CircuitBreaker,
        op_timeout: Duration,
    ) -> Self {
        Self { primary, local, breaker, op_timeout, counters: Arc::new(Counters::default()) }
    }

    /// Returns `true` while operations are being served from the local store.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.breaker.is_tripped()
    }

    /// The distributed store.
    #[must_use]
    pub fn primary(&self) -> &P {
        &self.primary
    }

    /// The local fallback store.
    #[must_use]
    pub fn local(&self) -> &MemoryBackend {
        &self.local
    }

    /// The breaker guarding the distributed store.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Returns a snapshot of the fallback counters.
    #[must_use]
    pub fn metrics(&self) -> FallbackMetrics {
        FallbackMetrics {
            primary_ops: self.counters.primary_ops.load(Ordering::Relaxed),
            local_ops: self.counters.local_ops.load(Ordering::Relaxed),
            primary_failures: self.counters.primary_failures.load(Ordering::Relaxed),
            breaker: self.breaker.metrics(),
        }
    }

    /// Runs `call` against the distributed store if the breaker allows it.
    ///
    /// Returns `None` when the caller should serve the operation locally.
    async fn try_primary<T, F>(&self, operation: &'static str, call: F) -> Option<CacheResult<T>>
    where
        F: Future<Output = CacheResult<T>> + Send,
    {
        if !self.breaker.allow_request() {
            self.counters.local_ops.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let result = match tokio::time::timeout(self.op_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::timeout()),
        };

        match result {
            Err(err) if err.is_transient() => {
                self.breaker.record_failure();
                self.counters.primary_failures.fetch_add(1, Ordering::Relaxed);
                self.counters.local_ops.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    backend_degraded = true,
                    operation,
                    error = %err,
                    "distributed cache unavailable, serving from local store",
                );
                None
            },
            other => {
                // A definitive answer, success or not, shows the store is reachable.
                self.breaker.record_success();
                self.counters.primary_ops.fetch_add(1, Ordering::Relaxed);
                Some(other)
            },
        }
    }
}

#[async_trait]
impl<P: CacheBackend> CacheBackend for FallbackBackend<P> {
    #[tracing::instrument(level = "trace", skip_all)]
    async fn get(&self, key: &[u8]) -> CacheResult<Option<Bytes>> {
        if let Some(result) = self.try_primary("get", self.primary.get(key)).await {
            return result;
        }
        self.local.get(key).await
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let call = self.primary.set(key.clone(), value.clone(), ttl);
        if let Some(result) = self.try_primary("set", call).await {
            return result;
        }
        self.local.set(key, value, ttl).await
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn take(&self, key: &[u8]) -> CacheResult<Option<Bytes>> {
        let call = async {
            fail_point!("cache-before-take", |_| {
                Err(CacheError::connection("injected failure before take"))
            });
            self.primary.take(key).await
        };
        if let Some(result) = self.try_primary("take", call).await {
            return result;
        }
        self.local.take(key).await
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn delete(&self, key: &[u8]) -> CacheResult<()> {
        if let Some(result) = self.try_primary("delete", self.primary.delete(key)).await {
            return result;
        }
        self.local.delete(key).await
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn increment(&self, key: &[u8], delta: i64, ttl: Duration) -> CacheResult<i64> {
        let call = self.primary.increment(key, delta, ttl);
        if let Some(result) = self.try_primary("increment", call).await {
            return result;
        }
        self.local.increment(key, delta, ttl).await
    }

    #[tracing::instrument(level = "trace", skip_all)]
    async fn health_check(&self) -> CacheResult<HealthStatus> {
        let started = Instant::now();
        if let Some(result) = self.try_primary("health_check", self.primary.health_check()).await {
            return Ok(result?.with_detail("circuit_state", self.breaker.state().as_str()));
        }

        Ok(HealthStatus::degraded(
            "fallback",
            started.elapsed(),
            "distributed cache unavailable, serving from local store",
        )
        .with_detail("circuit_state", self.breaker.state().as_str())
        .with_detail("local_entries", self.local.len().to_string()))
    }
}
