//! Error types for the Redis cache backend.
//!
//! Redis client errors are mapped onto the canonical
//! [`CacheError`](geogate_cache::CacheError) variants. The mapping decides
//! whether [`FallbackBackend`](geogate_cache::FallbackBackend) degrades:
//! anything that means "Redis could not be reached" becomes a transient
//! `Connection` or `Timeout`, while errors Redis itself answered with are
//! definitive.

use std::time::Duration;

use geogate_cache::{CacheError, ConfigError};
use redis::{ErrorKind, RedisError};
use thiserror::Error;

/// Result type alias for Redis backend setup.
pub type Result<T> = std::result::Result<T, RedisCacheError>;

/// Errors raised while setting up the Redis backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RedisCacheError {
    /// Error from the Redis client.
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The initial connection did not complete in time.
    #[error("Timed out connecting to Redis after {0:?}")]
    ConnectTimeout(Duration),
}

impl From<RedisCacheError> for CacheError {
    fn from(err: RedisCacheError) -> Self {
        match err {
            RedisCacheError::Redis(source) => redis_error_to_cache_error(source),
            RedisCacheError::Config(source) => {
                CacheError::internal_with_source("invalid Redis configuration", source)
            },
            RedisCacheError::ConnectTimeout(_) => CacheError::timeout(),
        }
    }
}

/// Converts a Redis client error to a cache error.
pub(crate) fn redis_error_to_cache_error(err: RedisError) -> CacheError {
    if err.is_timeout() {
        return CacheError::timeout();
    }

    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || matches!(
            err.kind(),
            ErrorKind::BusyLoadingError
                | ErrorKind::TryAgain
                | ErrorKind::ClusterDown
                | ErrorKind::MasterDown
        )
    {
        return CacheError::connection_with_source("Redis unreachable", err);
    }

    if err.kind() == ErrorKind::TypeError || err.to_string().contains("not an integer") {
        return CacheError::serialization_with_source("unexpected Redis value type", err);
    }

    CacheError::internal_with_source("Redis command failed", err)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;

    use super::*;

    fn io_error(kind: io::ErrorKind) -> RedisError {
        RedisError::from(io::Error::new(kind, "io"))
    }

    #[test]
    fn timeouts_map_to_timeout() {
        let err = redis_error_to_cache_error(io_error(io::ErrorKind::TimedOut));
        assert!(matches!(err, CacheError::Timeout));
    }

    #[test]
    fn refused_connections_are_transient() {
        let err = redis_error_to_cache_error(io_error(io::ErrorKind::ConnectionRefused));
        assert!(matches!(err, CacheError::Connection { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn dropped_connections_are_transient() {
        let err = redis_error_to_cache_error(io_error(io::ErrorKind::BrokenPipe));
        assert!(err.is_transient());
    }

    #[test]
    fn loading_is_transient() {
        let err = redis_error_to_cache_error(RedisError::from((
            ErrorKind::BusyLoadingError,
            "loading dataset",
        )));
        assert!(err.is_transient());
    }

    #[test]
    fn type_errors_map_to_serialization() {
        let err = redis_error_to_cache_error(RedisError::from((
            ErrorKind::TypeError,
            "response was of incompatible type",
        )));
        assert!(matches!(err, CacheError::Serialization { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn non_integer_counter_maps_to_serialization() {
        let err = redis_error_to_cache_error(RedisError::from((
            ErrorKind::ResponseError,
            "An error was signalled by the server",
            "value is not an integer or out of range".to_owned(),
        )));
        assert!(matches!(err, CacheError::Serialization { .. }));
    }

    #[test]
    fn other_errors_are_internal() {
        let err = redis_error_to_cache_error(RedisError::from((
            ErrorKind::AuthenticationFailed,
            "invalid password",
        )));
        assert!(matches!(err, CacheError::Internal { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn setup_errors_convert() {
        let err: CacheError = RedisCacheError::ConnectTimeout(Duration::from_secs(3)).into();
        assert!(err.is_transient());

        let config = ConfigError::MustBePositive { field: "op_timeout", value: "0s".into() };
        let err: CacheError = RedisCacheError::from(config).into();
        assert!(matches!(err, CacheError::Internal { .. }));
    }
}
