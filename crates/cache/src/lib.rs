//! Resilient key/value cache abstraction for geogate.
//!
//! This crate provides the [`CacheBackend`] trait that single-use tokens and
//! rate-limit counters are built on, together with the pieces that keep it
//! available when the distributed store is not.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │        TokenStore, AuthorizationFlow (geogate-authz)         │
//! │                  FixedWindowLimiter                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │                   CacheBackend trait                         │
//! │      (get, set, take, delete, increment, health_check)       │
//! ├──────────────────────────────────────────────────────────────┤
//! │                    FallbackBackend                           │
//! │        CircuitBreaker + op timeout + degraded logging        │
//! ├─────────────────────────────────┬────────────────────────────┤
//! │  RedisBackend (geogate-cache-   │      MemoryBackend         │
//! │  redis), distributed            │      local fallback        │
//! └─────────────────────────────────┴────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use geogate_cache::{CacheBackend, CacheConfig, FallbackBackend, MemoryBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! // Any CacheBackend can be the distributed store; Redis in production.
//! let cache = FallbackBackend::new(MemoryBackend::new(), &CacheConfig::default()).unwrap();
//!
//! cache.set(b"token:abc".to_vec(), b"record".to_vec(), Duration::from_secs(300)).await.unwrap();
//! assert!(cache.take(b"token:abc").await.unwrap().is_some());
//! assert!(cache.take(b"token:abc").await.unwrap().is_none());
//! assert!(!cache.is_degraded());
//! # });
//! ```
//!
//! # Error Handling
//!
//! All operations return [`CacheResult<T>`]. Backends map their internal
//! errors onto [`CacheError`]; only [`CacheError::is_transient`] errors cause
//! [`FallbackBackend`] to degrade.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with [`FlakyBackend`](testutil::FlakyBackend)
//!   and assertion macros. Enable this in `[dev-dependencies]` for integration tests.
//! - **`failpoints`**: Compiles in `fail` injection points (`cache-before-take`).

#![deny(unsafe_code)]

pub mod backend;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod fallback;
pub mod health;
pub mod memory;
pub mod rate_limiter;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

pub use backend::CacheBackend;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
pub use config::{CacheConfig, DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW, RateLimitConfig};
pub use error::{BoxError, CacheError, CacheResult, ConfigError};
pub use fallback::{FallbackBackend, FallbackMetrics};
pub use health::{HealthState, HealthStatus};
pub use memory::{DEFAULT_LOCAL_CAPACITY, MemoryBackend};
pub use rate_limiter::{FixedWindowLimiter, RateDecision, RateLimitMetricsSnapshot};
