//! Authorization error types.
//!
//! [`AuthzError`] separates three audiences:
//!
//! - **Authorization failures** ([`AuthzError::is_authorization_failure`]): the
//!   caller presented something unacceptable. Token failures are deliberately
//!   coarse: a token that never existed, was already used, or expired all
//!   report [`AuthzError::InvalidOrExpiredToken`].
//! - **Back-off signals**: [`AuthzError::RateLimitExceeded`] is surfaced
//!   distinctly so callers can slow down.
//! - **System errors** ([`AuthzError::is_system_error`]): the actuator or the
//!   cache failed. An actuator failure happens after the token was spent.
//!
//! [`AuthzError::user_message`] gives a generic text safe to show end users.

use std::time::Duration;

use geogate_cache::CacheError;
use thiserror::Error;

use crate::{actuator::ActuatorError, token::TokenKind};

/// Result type alias for authorization operations.
pub type Result<T, E = AuthzError> = std::result::Result<T, E>;

/// Errors produced by the authorization flow.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// The token is unknown, already consumed, or expired.
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    /// The token exists but is of the wrong kind. It has been consumed.
    #[error("Token kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        /// The kind the operation required.
        expected: TokenKind,
        /// The kind of the presented token.
        actual: TokenKind,
    },

    /// The reported location is outside the geofence.
    #[error("Location out of range: {distance_km:.3} km from target")]
    OutOfRange {
        /// Distance from the geofence center.
        distance_km: f64,
    },

    /// The reported location is not precise enough to trust.
    #[error("Location accuracy too low: {accuracy_m} m")]
    InaccurateLocation {
        /// Reported accuracy radius in meters.
        accuracy_m: f64,
    },

    /// The coordinates are not a valid point on Earth.
    #[error("Invalid coordinates: ({lat}, {lng})")]
    InvalidCoordinates {
        /// Reported latitude.
        lat: f64,
        /// Reported longitude.
        lng: f64,
    },

    /// Too many requests in the current window.
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded {
        /// Upper bound on how long to wait before retrying.
        retry_after: Duration,
    },

    /// The owner is not permitted to use the gate.
    #[error("Owner is not allowed")]
    NotAllowed,

    /// The actuator could not be driven. The token has already been spent.
    #[error("Actuator unreachable: {0}")]
    ActuatorUnreachable(#[source] ActuatorError),

    /// The cache returned a non-recoverable error.
    #[error("Token storage error: {0}")]
    Storage(#[source] CacheError),
}

impl AuthzError {
    /// Returns a generic message suitable for end users.
    ///
    /// Messages never reveal whether a token existed or why it was rejected
    /// beyond what the user can act on.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidOrExpiredToken | Self::KindMismatch { .. } => {
                "This link is invalid or has expired. Please request a new one."
            },
            Self::OutOfRange { .. } => "You are not within range of the gate.",
            Self::InaccurateLocation { .. } => {
                "Your location is not precise enough. Please enable precise location and try again."
            },
            Self::InvalidCoordinates { .. } => "The submitted location is invalid.",
            Self::RateLimitExceeded { .. } => "Too many requests. Please try again later.",
            Self::NotAllowed => "You are not registered to use this gate.",
            Self::ActuatorUnreachable(_) => {
                "The gate could not be reached. Please verify your location again."
            },
            Self::Storage(_) => "A system error occurred. Please try again later.",
        }
    }

    /// Returns `true` if the caller presented an unacceptable token,
    /// location, or identity.
    #[must_use]
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidOrExpiredToken
                | Self::KindMismatch { .. }
                | Self::OutOfRange { .. }
                | Self::InaccurateLocation { .. }
                | Self::InvalidCoordinates { .. }
                | Self::NotAllowed
        )
    }

    /// Returns `true` if a collaborator failed rather than the caller.
    #[must_use]
    pub fn is_system_error(&self) -> bool {
        matches!(self, Self::ActuatorUnreachable(_) | Self::Storage(_))
    }
}

impl From<CacheError> for AuthzError {
    fn from(err: CacheError) -> Self {
        Self::Storage(err)
    }
}

impl From<ActuatorError> for AuthzError {
    fn from(err: ActuatorError) -> Self {
        Self::ActuatorUnreachable(err)
    }
}
