//! Cache and rate-limit configuration.
//!
//! Both structs deserialize from any serde format (durations in humantime
//! form, e.g. `"2s"`) and can be built programmatically through validating
//! `bon` builders.
//!
//! ```
//! use std::time::Duration;
//! use geogate_cache::{CacheConfig, RateLimitConfig};
//!
//! let cache = CacheConfig::builder()
//!     .url("redis://cache.internal:6379")
//!     .op_timeout(Duration::from_millis(500))
//!     .build()?;
//! assert_eq!(cache.key_prefix(), "geogate:");
//!
//! let limits = RateLimitConfig::builder().limit(10).build()?;
//! assert_eq!(limits.window(), Duration::from_secs(60));
//! # Ok::<(), geogate_cache::ConfigError>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    circuit_breaker::{CircuitBreakerConfig, DEFAULT_COOLDOWN},
    error::ConfigError,
    memory::DEFAULT_LOCAL_CAPACITY,
};

const DEFAULT_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_KEY_PREFIX: &str = "geogate:";

/// Default number of requests allowed per window.
pub const DEFAULT_RATE_LIMIT: u32 = 30;

/// Default fixed-window length.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Configuration for the distributed cache and its local fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Distributed cache address.
    #[serde(default = "default_url")]
    pub(crate) url: String,

    /// Upper bound on a single distributed cache operation.
    #[serde(with = "humantime_serde", default = "default_op_timeout")]
    pub(crate) op_timeout: Duration,

    /// Upper bound on establishing the initial connection.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub(crate) connect_timeout: Duration,

    /// How long to stay on the local store before probing the distributed
    /// cache again.
    #[serde(with = "humantime_serde", default = "default_recovery_cooldown")]
    pub(crate) recovery_cooldown: Duration,

    /// Maximum live entries in the local fallback store.
    #[serde(default = "default_local_capacity")]
    pub(crate) local_capacity: usize,

    /// Namespace prepended to every distributed cache key.
    #[serde(default = "default_key_prefix")]
    pub(crate) key_prefix: String,
}

fn default_url() -> String {
    DEFAULT_URL.to_owned()
}

fn default_op_timeout() -> Duration {
    DEFAULT_OP_TIMEOUT
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_recovery_cooldown() -> Duration {
    DEFAULT_COOLDOWN
}

fn default_local_capacity() -> usize {
    DEFAULT_LOCAL_CAPACITY
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_owned()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            op_timeout: DEFAULT_OP_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            recovery_cooldown: DEFAULT_COOLDOWN,
            local_capacity: DEFAULT_LOCAL_CAPACITY,
            key_prefix: default_key_prefix(),
        }
    }
}

#[bon::bon]
impl CacheConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `url` is empty, any duration is zero, or
    /// `local_capacity` is zero.
    #[builder]
    pub fn new(
        #[builder(into, default = default_url())] url: String,
        #[builder(default = DEFAULT_OP_TIMEOUT)] op_timeout: Duration,
        #[builder(default = DEFAULT_CONNECT_TIMEOUT)] connect_timeout: Duration,
        #[builder(default = DEFAULT_COOLDOWN)] recovery_cooldown: Duration,
        #[builder(default = DEFAULT_LOCAL_CAPACITY)] local_capacity: usize,
        #[builder(into, default = default_key_prefix())] key_prefix: String,
    ) -> Result<Self, ConfigError> {
        let config =
            Self { url, op_timeout, connect_timeout, recovery_cooldown, local_capacity, key_prefix };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field. Deserialized configs should be validated before
    /// use.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "url", reason: "must not be empty".into() });
        }
        positive_duration("op_timeout", self.op_timeout)?;
        positive_duration("connect_timeout", self.connect_timeout)?;
        positive_duration("recovery_cooldown", self.recovery_cooldown)?;
        if self.local_capacity == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "local_capacity",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Distributed cache address.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Per-operation timeout.
    #[must_use]
    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    /// Connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Cooldown before probing the distributed cache again.
    #[must_use]
    pub fn recovery_cooldown(&self) -> Duration {
        self.recovery_cooldown
    }

    /// Local fallback capacity.
    #[must_use]
    pub fn local_capacity(&self) -> usize {
        self.local_capacity
    }

    /// Key namespace.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Breaker settings derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `recovery_cooldown` is zero.
    pub fn circuit_breaker(&self) -> Result<CircuitBreakerConfig, ConfigError> {
        CircuitBreakerConfig::builder().cooldown(self.recovery_cooldown).build()
    }
}

/// Fixed-window rate limit settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    #[serde(default = "default_limit")]
    pub(crate) limit: u32,

    /// Window length.
    #[serde(with = "humantime_serde", default = "default_window")]
    pub(crate) window: Duration,
}

fn default_limit() -> u32 {
    DEFAULT_RATE_LIMIT
}

fn default_window() -> Duration {
    DEFAULT_RATE_WINDOW
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { limit: DEFAULT_RATE_LIMIT, window: DEFAULT_RATE_WINDOW }
    }
}

#[bon::bon]
impl RateLimitConfig {
    /// Creates a validated rate limit.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `limit` or `window` is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_RATE_LIMIT)] limit: u32,
        #[builder(default = DEFAULT_RATE_WINDOW)] window: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { limit, window };
        config.validate()?;
        Ok(config)
    }

    /// `limit` requests per `window`, not yet validated.
    #[must_use]
    pub const fn per_window(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limit == 0 {
            return Err(ConfigError::MustBePositive { field: "limit", value: "0".into() });
        }
        positive_duration("window", self.window)
    }

    /// Requests allowed per window.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

fn positive_duration(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::MustBePositive { field, value: "0s".into() });
    }
    Ok(())
}
