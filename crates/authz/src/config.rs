//! Gate configuration.
//!
//! [`GateConfig`] gathers every tunable the authorization core reads: the
//! cache connection, token lifetimes, the rate limits and the geofence.
//! Each part deserializes with defaults for missing fields, so an empty
//! document is a complete configuration:
//!
//! ```
//! use std::time::Duration;
//! use geogate_authz::GateConfig;
//!
//! let config: GateConfig = serde_json::from_str(
//!     r#"{"tokens": {"verify_ttl": "2m"}, "geofence": {"max_distance_km": 0.3}}"#,
//! )?;
//! config.validate()?;
//!
//! assert_eq!(config.tokens().verify_ttl(), Duration::from_secs(120));
//! assert_eq!(config.rate_limit().limit(), 30);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::time::Duration;

use geogate_cache::{CacheConfig, ConfigError, RateLimitConfig};
use serde::{Deserialize, Serialize};

use crate::geofence::{Coordinate, Geofence};

const DEFAULT_VERIFY_TTL: Duration = Duration::from_secs(300);
const DEFAULT_ACTION_TTL: Duration = Duration::from_secs(300);
const DEFAULT_VERIFY_URL_BASE: &str = "http://127.0.0.1:8080/verify-location";

/// Longest accepted token lifetime.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default per-owner limit on location submissions.
pub const DEFAULT_LOCATION_RATE_LIMIT: RateLimitConfig =
    RateLimitConfig::per_window(5, Duration::from_secs(60));
/// Default limit on requests across all owners.
pub const DEFAULT_GLOBAL_RATE_LIMIT: RateLimitConfig =
    RateLimitConfig::per_window(100, Duration::from_secs(60));

/// Default geofence center latitude.
pub const DEFAULT_TARGET_LAT: f64 = 24.79155;
/// Default geofence center longitude.
pub const DEFAULT_TARGET_LNG: f64 = 120.99442;
/// Default geofence radius.
pub const DEFAULT_MAX_DISTANCE_KM: f64 = 0.5;
/// Default largest accepted accuracy radius.
pub const DEFAULT_MAX_ACCURACY_M: f64 = 50.0;

/// What happens to a verification token when the submitted location is
/// rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyRetryPolicy {
    /// The token is spent whatever the outcome. The user must start over.
    #[default]
    SingleUse,
    /// After an out-of-range or inaccurate location the token is put back for
    /// the rest of its lifetime.
    RetainOnFailure,
}

/// Token lifetimes and the verification link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    /// Lifetime of a location verification token.
    #[serde(with = "humantime_serde", default = "default_verify_ttl")]
    pub(crate) verify_ttl: Duration,

    /// Lifetime of an action token pair.
    #[serde(with = "humantime_serde", default = "default_action_ttl")]
    pub(crate) action_ttl: Duration,

    /// Page the verification link points at. The token is appended as
    /// `?token=<id>`.
    #[serde(default = "default_verify_url_base")]
    pub(crate) verify_url_base: String,

    /// Whether a rejected location spends the verification token.
    #[serde(default)]
    pub(crate) verify_retry: VerifyRetryPolicy,
}

fn default_verify_ttl() -> Duration {
    DEFAULT_VERIFY_TTL
}

fn default_action_ttl() -> Duration {
    DEFAULT_ACTION_TTL
}

fn default_verify_url_base() -> String {
    DEFAULT_VERIFY_URL_BASE.to_owned()
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            verify_ttl: DEFAULT_VERIFY_TTL,
            action_ttl: DEFAULT_ACTION_TTL,
            verify_url_base: default_verify_url_base(),
            verify_retry: VerifyRetryPolicy::default(),
        }
    }
}

#[bon::bon]
impl TokenConfig {
    /// Creates a validated token configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a TTL is zero or longer than
    /// [`MAX_TOKEN_TTL`], or `verify_url_base` is empty or already carries a
    /// query string.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_VERIFY_TTL)] verify_ttl: Duration,
        #[builder(default = DEFAULT_ACTION_TTL)] action_ttl: Duration,
        #[builder(into, default = default_verify_url_base())] verify_url_base: String,
        #[builder(default)] verify_retry: VerifyRetryPolicy,
    ) -> Result<Self, ConfigError> {
        let config = Self { verify_ttl, action_ttl, verify_url_base, verify_retry };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        token_ttl("verify_ttl", self.verify_ttl)?;
        token_ttl("action_ttl", self.action_ttl)?;
        if self.verify_url_base.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "verify_url_base",
                reason: "must not be empty".into(),
            });
        }
        if self.verify_url_base.contains('?') {
            return Err(ConfigError::Invalid {
                field: "verify_url_base",
                reason: "must not contain a query string".into(),
            });
        }
        Ok(())
    }

    /// Verification token lifetime.
    #[must_use]
    pub fn verify_ttl(&self) -> Duration {
        self.verify_ttl
    }

    /// Action token lifetime.
    #[must_use]
    pub fn action_ttl(&self) -> Duration {
        self.action_ttl
    }

    /// Verification page address.
    #[must_use]
    pub fn verify_url_base(&self) -> &str {
        &self.verify_url_base
    }

    /// Retry policy for rejected locations.
    #[must_use]
    pub fn verify_retry(&self) -> VerifyRetryPolicy {
        self.verify_retry
    }
}

/// Where the gate is and how close users must be.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeofenceConfig {
    /// Center latitude in degrees.
    #[serde(default = "default_target_lat")]
    pub(crate) target_lat: f64,

    /// Center longitude in degrees.
    #[serde(default = "default_target_lng")]
    pub(crate) target_lng: f64,

    /// Radius in kilometres.
    #[serde(default = "default_max_distance_km")]
    pub(crate) max_distance_km: f64,

    /// Largest accepted accuracy radius in meters.
    #[serde(default = "default_max_accuracy_m")]
    pub(crate) max_accuracy_m: f64,
}

fn default_target_lat() -> f64 {
    DEFAULT_TARGET_LAT
}

fn default_target_lng() -> f64 {
    DEFAULT_TARGET_LNG
}

fn default_max_distance_km() -> f64 {
    DEFAULT_MAX_DISTANCE_KM
}

fn default_max_accuracy_m() -> f64 {
    DEFAULT_MAX_ACCURACY_M
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            target_lat: DEFAULT_TARGET_LAT,
            target_lng: DEFAULT_TARGET_LNG,
            max_distance_km: DEFAULT_MAX_DISTANCE_KM,
            max_accuracy_m: DEFAULT_MAX_ACCURACY_M,
        }
    }
}

#[bon::bon]
impl GeofenceConfig {
    /// Creates a validated geofence configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the center is not a valid coordinate or a
    /// limit is not a positive finite number.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_TARGET_LAT)] target_lat: f64,
        #[builder(default = DEFAULT_TARGET_LNG)] target_lng: f64,
        #[builder(default = DEFAULT_MAX_DISTANCE_KM)] max_distance_km: f64,
        #[builder(default = DEFAULT_MAX_ACCURACY_M)] max_accuracy_m: f64,
    ) -> Result<Self, ConfigError> {
        let config = Self { target_lat, target_lng, max_distance_km, max_accuracy_m };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.geofence().map(|_| ())
    }

    /// Builds the [`Geofence`] this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn geofence(&self) -> Result<Geofence, ConfigError> {
        let center = Coordinate::new(self.target_lat, self.target_lng).map_err(|_| {
            ConfigError::OutOfRange {
                field: "target",
                range: "lat -90..=90, lng -180..=180".into(),
                value: format!("({}, {})", self.target_lat, self.target_lng),
            }
        })?;
        positive_finite("max_distance_km", self.max_distance_km)?;
        positive_finite("max_accuracy_m", self.max_accuracy_m)?;
        Ok(Geofence::new(center, self.max_distance_km, self.max_accuracy_m))
    }

    /// Center latitude.
    #[must_use]
    pub fn target_lat(&self) -> f64 {
        self.target_lat
    }

    /// Center longitude.
    #[must_use]
    pub fn target_lng(&self) -> f64 {
        self.target_lng
    }

    /// Radius in kilometres.
    #[must_use]
    pub fn max_distance_km(&self) -> f64 {
        self.max_distance_km
    }

    /// Largest accepted accuracy radius in meters.
    #[must_use]
    pub fn max_accuracy_m(&self) -> f64 {
        self.max_accuracy_m
    }
}

/// Complete configuration for an [`AuthorizationFlow`](crate::AuthorizationFlow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Distributed cache and local fallback.
    #[serde(default)]
    pub(crate) cache: CacheConfig,

    /// Token lifetimes and verification link.
    #[serde(default)]
    pub(crate) tokens: TokenConfig,

    /// Per-owner limit on starting a verification.
    #[serde(default)]
    pub(crate) rate_limit: RateLimitConfig,

    /// Per-owner limit on location submissions.
    #[serde(default = "default_location_rate_limit")]
    pub(crate) location_rate_limit: RateLimitConfig,

    /// One counter shared by every owner, charged by both of the above.
    #[serde(default = "default_global_rate_limit")]
    pub(crate) global_rate_limit: RateLimitConfig,

    /// Gate location.
    #[serde(default)]
    pub(crate) geofence: GeofenceConfig,
}

fn default_location_rate_limit() -> RateLimitConfig {
    DEFAULT_LOCATION_RATE_LIMIT
}

fn default_global_rate_limit() -> RateLimitConfig {
    DEFAULT_GLOBAL_RATE_LIMIT
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            tokens: TokenConfig::default(),
            rate_limit: RateLimitConfig::default(),
            location_rate_limit: DEFAULT_LOCATION_RATE_LIMIT,
            global_rate_limit: DEFAULT_GLOBAL_RATE_LIMIT,
            geofence: GeofenceConfig::default(),
        }
    }
}

#[bon::bon]
impl GateConfig {
    /// Creates a validated configuration. Omitted parts use their defaults.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found in any part.
    #[builder]
    pub fn new(
        #[builder(default)] cache: CacheConfig,
        #[builder(default)] tokens: TokenConfig,
        #[builder(default)] rate_limit: RateLimitConfig,
        #[builder(default = DEFAULT_LOCATION_RATE_LIMIT)] location_rate_limit: RateLimitConfig,
        #[builder(default = DEFAULT_GLOBAL_RATE_LIMIT)] global_rate_limit: RateLimitConfig,
        #[builder(default)] geofence: GeofenceConfig,
    ) -> Result<Self, ConfigError> {
        let config =
            Self { cache, tokens, rate_limit, location_rate_limit, global_rate_limit, geofence };
        config.validate()?;
        Ok(config)
    }

    /// Validates every part.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.tokens.validate()?;
        self.rate_limit.validate()?;
        self.location_rate_limit.validate()?;
        self.global_rate_limit.validate()?;
        self.geofence.validate()
    }

    /// Cache settings.
    #[must_use]
    pub fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    /// Token settings.
    #[must_use]
    pub fn tokens(&self) -> &TokenConfig {
        &self.tokens
    }

    /// Rate limit settings.
    #[must_use]
    pub fn rate_limit(&self) -> &RateLimitConfig {
        &self.rate_limit
    }

    /// Location submission limit.
    #[must_use]
    pub fn location_rate_limit(&self) -> &RateLimitConfig {
        &self.location_rate_limit
    }

    /// Limit shared by all owners.
    #[must_use]
    pub fn global_rate_limit(&self) -> &RateLimitConfig {
        &self.global_rate_limit
    }

    /// Geofence settings.
    #[must_use]
    pub fn geofence(&self) -> &GeofenceConfig {
        &self.geofence
    }
}

fn token_ttl(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::MustBePositive { field, value: "0s".into() });
    }
    if value > MAX_TOKEN_TTL {
        return Err(ConfigError::OutOfRange {
            field,
            range: format!("1ns..={}s", MAX_TOKEN_TTL.as_secs()),
            value: format!("{value:?}"),
        });
    }
    Ok(())
}

fn positive_finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::MustBePositive { field, value: value.to_string() });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults() {
        let config = GateConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tokens().verify_ttl(), Duration::from_secs(300));
        assert_eq!(config.tokens().action_ttl(), Duration::from_secs(300));
        assert_eq!(config.tokens().verify_retry(), VerifyRetryPolicy::SingleUse);
        assert_eq!(config.geofence().max_distance_km(), 0.5);
        assert_eq!(config.geofence().max_accuracy_m(), 50.0);
        assert_eq!(config.rate_limit().limit(), 30);
        assert_eq!(config.location_rate_limit().limit(), 5);
        assert_eq!(config.global_rate_limit().limit(), 100);
        assert_eq!(config.cache().op_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn builders_match_defaults() {
        assert_eq!(GateConfig::builder().build().unwrap(), GateConfig::default());
        assert_eq!(TokenConfig::builder().build().unwrap(), TokenConfig::default());
        assert_eq!(GeofenceConfig::builder().build().unwrap(), GeofenceConfig::default());
    }

    #[test]
    fn empty_document_is_complete() {
        let config: GateConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, GateConfig::default());
    }

    #[test]
    fn nested_overrides() {
        let config: GateConfig = serde_json::from_str(
            r#"{
                "cache": {"url": "redis://cache:6379", "op_timeout": "750ms"},
                "tokens": {"action_ttl": "10m", "verify_retry": "retain_on_failure"},
                "rate_limit": {"limit": 5, "window": "30s"},
                "global_rate_limit": {"limit": 1000},
                "geofence": {"target_lat": 25.0, "target_lng": 121.5}
            }"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.cache().op_timeout(), Duration::from_millis(750));
        assert_eq!(config.tokens().action_ttl(), Duration::from_secs(600));
        assert_eq!(config.tokens().verify_retry(), VerifyRetryPolicy::RetainOnFailure);
        assert_eq!(config.rate_limit().window(), Duration::from_secs(30));
        assert_eq!(config.global_rate_limit().limit(), 1000);
        assert_eq!(config.global_rate_limit().window(), Duration::from_secs(60));
        assert_eq!(config.location_rate_limit(), &DEFAULT_LOCATION_RATE_LIMIT);
        assert_eq!(config.geofence().target_lng(), 121.5);
        assert_eq!(config.geofence().max_distance_km(), DEFAULT_MAX_DISTANCE_KM);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(serde_json::from_str::<GateConfig>(r#"{"debug_bypass": true}"#).is_err());
        assert!(serde_json::from_str::<TokenConfig>(r#"{"ttl": "5m"}"#).is_err());
    }

    #[rstest]
    #[case::verify_ttl(TokenConfig::builder().verify_ttl(Duration::ZERO).build(), "verify_ttl")]
    #[case::action_ttl(TokenConfig::builder().action_ttl(Duration::ZERO).build(), "action_ttl")]
    #[case::unbounded_verify_ttl(TokenConfig::builder().verify_ttl(Duration::MAX).build(), "verify_ttl")]
    #[case::unbounded_action_ttl(
        TokenConfig::builder().action_ttl(MAX_TOKEN_TTL + Duration::from_secs(1)).build(),
        "action_ttl"
    )]
    #[case::empty_url(TokenConfig::builder().verify_url_base("").build(), "verify_url_base")]
    #[case::query_url(
        TokenConfig::builder().verify_url_base("https://gate.test/verify?x=1").build(),
        "verify_url_base"
    )]
    fn invalid_token_config(#[case] result: Result<TokenConfig, ConfigError>, #[case] field: &str) {
        let err = result.unwrap_err();
        assert!(err.to_string().starts_with(field), "{err}");
    }

    #[rstest]
    #[case::lat(GeofenceConfig::builder().target_lat(91.0).build(), "target")]
    #[case::distance(GeofenceConfig::builder().max_distance_km(0.0).build(), "max_distance_km")]
    #[case::nan_distance(GeofenceConfig::builder().max_distance_km(f64::NAN).build(), "max_distance_km")]
    #[case::accuracy(GeofenceConfig::builder().max_accuracy_m(-5.0).build(), "max_accuracy_m")]
    fn invalid_geofence_config(
        #[case] result: Result<GeofenceConfig, ConfigError>,
        #[case] field: &str,
    ) {
        let err = result.unwrap_err();
        assert!(err.to_string().starts_with(field), "{err}");
    }

    #[test]
    fn gate_config_surfaces_nested_errors() {
        let mut config = GateConfig::default();
        config.tokens.verify_ttl = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MustBePositive { field: "verify_ttl", .. })
        ));
    }

    #[test]
    fn longest_token_ttl_is_accepted() {
        let config = TokenConfig::builder().verify_ttl(MAX_TOKEN_TTL).action_ttl(MAX_TOKEN_TTL).build();
        assert!(config.is_ok());

        let mut gate = GateConfig::default();
        gate.tokens.action_ttl = Duration::MAX;
        assert!(matches!(gate.validate(), Err(ConfigError::OutOfRange { field: "action_ttl", .. })));
    }

    #[test]
    fn gate_config_validates_every_limit() {
        let mut config = GateConfig::default();
        config.global_rate_limit = RateLimitConfig::per_window(0, Duration::from_secs(60));
        assert!(matches!(config.validate(), Err(ConfigError::MustBePositive { field: "limit", .. })));
    }

    #[test]
    fn geofence_from_config() {
        let fence = GeofenceConfig::default().geofence().unwrap();
        assert_eq!(fence.center().lat(), DEFAULT_TARGET_LAT);
        assert_eq!(fence.max_distance_km(), DEFAULT_MAX_DISTANCE_KM);
    }
}
