//! Redis-backed implementation of [`CacheBackend`](geogate_cache::CacheBackend).
//!
//! [`RedisBackend`] is the distributed store that geogate shares between
//! request handlers. Its `take` is a single `GETDEL`, so a token can be
//! redeemed at most once no matter how many requests race for it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                FallbackBackend<RedisBackend>                │
//! │        (op timeout, circuit breaker, local fallback)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      RedisBackend                           │
//! │              (implements CacheBackend trait)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │                redis::aio::ConnectionManager                │
//! │          (shared multiplexed connection, reconnects)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! // Requires a running Redis server.
//! use std::time::Duration;
//! use geogate_cache::{CacheBackend, CacheConfig, FallbackBackend};
//! use geogate_cache_redis::RedisBackend;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::default();
//!     let cache = FallbackBackend::new(RedisBackend::connect(&config).await?, &config)?;
//!
//!     cache.set(b"token:abc".to_vec(), b"record".to_vec(), Duration::from_secs(300)).await?;
//!     assert!(cache.take(b"token:abc").await?.is_some());
//!     Ok(())
//! }
//! ```
//!
//! # Error Mapping
//!
//! | Redis condition | `CacheError` |
//! |-----------------|--------------|
//! | I/O error, refused or dropped connection, loading | `Connection` (transient) |
//! | Socket timeout | `Timeout` (transient) |
//! | Wrong value type | `Serialization` |
//! | Anything else | `Internal` |

#![deny(unsafe_code)]

mod backend;
mod error;
mod keys;

pub use backend::RedisBackend;
pub use error::{RedisCacheError, Result};
