//! # geogate authorization
//!
//! Single-use, location-verified authorization for a remote gate.
//!
//! A request to operate the gate goes through two token phases:
//!
//! 1. [`AuthorizationFlow::request_action`] rate-limits the owner, checks the
//!    [`UserDirectory`], and issues a `LocationVerify` token wrapped in a
//!    verification link.
//! 2. [`AuthorizationFlow::submit_location`] spends that token, checks the
//!    reported position against the [`Geofence`], and on success issues an
//!    `ActionOpen` / `ActionClose` pair sharing one correlation id.
//! 3. [`AuthorizationFlow::submit_action`] spends one half of the pair,
//!    revokes the other half, and calls the [`Actuator`].
//!
//! Tokens live in a [`CacheBackend`](geogate_cache::CacheBackend) and are
//! only ever read with an atomic take, so each one is redeemed at most once
//! under any amount of concurrency.
//!
//! ## Errors
//!
//! Every operation returns [`AuthzError`]. Token failures collapse into
//! [`AuthzError::InvalidOrExpiredToken`] so callers cannot probe which tokens
//! exist. [`AuthzError::user_message`] gives safe text for end users.
//!
//! ## Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with stand-in actuators,
//!   a pre-wired flow, and `assert_authz_error!`.
//! - **`failpoints`**: Compiles in `fail` injection points
//!   (`authz-before-sibling-revoke`, `actuator-before-retry`).

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Gate actuator seam and retry wrapper.
pub mod actuator;
/// Gate configuration.
pub mod config;
/// User entitlement seam.
pub mod directory;
/// Authorization error types.
pub mod error;
/// The two-phase authorization flow.
pub mod flow;
/// Distance and geofence checks.
pub mod geofence;
/// Single-use token storage.
pub mod store;
/// Token ids and records.
pub mod token;

/// Test helpers.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

pub use actuator::{
    Actuator, ActuatorError, Command, DEFAULT_PUBLISH_ATTEMPTS, DEFAULT_PUBLISH_DELAY,
    RetryingActuator,
};
pub use config::{GateConfig, GeofenceConfig, MAX_TOKEN_TTL, TokenConfig, VerifyRetryPolicy};
pub use directory::{DirectoryError, StaticUserDirectory, UserDirectory};
pub use error::{AuthzError, Result};
pub use flow::{ActionChoice, ActionOutcome, AuthorizationFlow, GeofenceSubmission, VerificationTicket};
pub use geofence::{Coordinate, EARTH_RADIUS_KM, Geofence, GeofenceVerdict, distance_km, within};
pub use store::{ActionPair, IssuedToken, TokenStore};
pub use token::{CorrelationId, TokenId, TokenKind, TokenRecord};
