//! Fixed-window rate limiting on top of a [`CacheBackend`].
//!
//! Each client key maps to one counter entry. The first request in a window
//! creates the counter with a TTL equal to the window; later requests in the
//! same window increment it without touching the TTL. Once the counter
//! expires, the next request starts a fresh window with a count of 1.
//!
//! This is a fixed window, not a sliding one: a burst straddling a window
//! boundary can briefly see up to twice the nominal rate.
//!
//! # Example
//!
//! ```
//! use geogate_cache::{FixedWindowLimiter, MemoryBackend, RateLimitConfig};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let config = RateLimitConfig::builder().limit(2).build().unwrap();
//! let limiter = FixedWindowLimiter::new(MemoryBackend::new(), config);
//!
//! assert!(limiter.allow("203.0.113.7").await);
//! assert!(limiter.allow("203.0.113.7").await);
//! assert!(!limiter.allow("203.0.113.7").await);
//! # });
//! ```

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::{backend::CacheBackend, config::RateLimitConfig, error::CacheResult};

const KEY_PREFIX: &str = "ratelimit:";

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests counted in the current window, including this one.
    pub count: i64,
    /// The configured per-window limit.
    pub limit: u32,
    /// Upper bound on how long until the window resets, when denied.
    pub retry_after: Option<Duration>,
}

/// Snapshot of limiter counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitMetricsSnapshot {
    /// Requests allowed through.
    pub allowed: u64,
    /// Requests rejected.
    pub rejected: u64,
    /// Checks that could not reach any backend and were allowed.
    pub failed_open: u64,
}

#[derive(Debug, Default)]
struct RateLimitMetrics {
    allowed: AtomicU64,
    rejected: AtomicU64,
    failed_open: AtomicU64,
}

/// Fixed-window request counter.
#[derive(Debug)]
pub struct FixedWindowLimiter<B> {
    backend: B,
    config: RateLimitConfig,
    metrics: RateLimitMetrics,
}

impl<B: CacheBackend> FixedWindowLimiter<B> {
    /// Creates a limiter that stores its counters in `backend`.
    #[must_use]
    pub fn new(backend: B, config: RateLimitConfig) -> Self {
        Self { backend, config, metrics: RateLimitMetrics::default() }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Counts a request for `key` and reports whether it is within the limit.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the counter could not be incremented.
    #[tracing::instrument(level = "debug", skip(self), fields(limit = self.config.limit()))]
    pub async fn check(&self, key: &str) -> CacheResult<RateDecision> {
        let counter_key = format!("{KEY_PREFIX}{key}").into_bytes();
        let count = self.backend.increment(&counter_key, 1, self.config.window()).await?;
        let allowed = count <= i64::from(self.config.limit());

        if allowed {
            self.metrics.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(count, "rate limit exceeded");
        }

        Ok(RateDecision {
            allowed,
            count,
            limit: self.config.limit(),
            retry_after: (!allowed).then(|| self.config.window()),
        })
    }

    /// Like [`check`](Self::check), but fails open: if the backend errors,
    /// the request is allowed with a count of 0 and the failure is logged.
    pub async fn decide(&self, key: &str) -> RateDecision {
        match self.check(key).await {
            Ok(decision) => decision,
            Err(err) => {
                self.metrics.failed_open.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %err, "rate limiter backend unavailable, allowing request");
                RateDecision { allowed: true, count: 0, limit: self.config.limit(), retry_after: None }
            },
        }
    }

    /// Returns `true` if a request for `key` may proceed. Fails open.
    pub async fn allow(&self, key: &str) -> bool {
        self.decide(key).await.allowed
    }

    /// Returns a snapshot of the limiter counters.
    #[must_use]
    pub fn metrics(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            allowed: self.metrics.allowed.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
            failed_open: self.metrics.failed_open.load(Ordering::Relaxed),
        }
    }
}
