//! The two-phase authorization state machine.
//!
//! ```text
//! request_action(owner)
//!   │  owner + global rate limit, user directory
//!   ▼
//! start_verification ──► LocationVerify token ──► verification link
//!                                  │
//! submit_location(token, lat, lng, accuracy)
//!   │  consume (always), owner + global rate limit, geofence
//!   ▼
//! ActionOpen + ActionClose tokens (one correlation group)
//!                                  │
//! submit_action(token, command)
//!   │  consume, revoke sibling, publish
//!   ▼
//! Actuator
//! ```
//!
//! Each token is consumed before anything else is checked, so one token
//! buys at most one attempt. A token that is unknown, spent, or expired is
//! indistinguishable to the caller.

use chrono::{DateTime, Utc};
use fail::fail_point;
use geogate_cache::{
    CacheBackend, CacheResult, ConfigError, FixedWindowLimiter, HealthStatus, RateDecision,
};
use serde::Serialize;

use crate::{
    actuator::{Actuator, Command},
    config::{GateConfig, TokenConfig, VerifyRetryPolicy},
    directory::UserDirectory,
    error::{AuthzError, Result},
    geofence::{Coordinate, Geofence},
    store::{ActionPair, TokenStore},
    token::{TokenId, TokenKind, TokenRecord},
};

/// Counter key shared by every owner.
const GLOBAL_RATE_KEY: &str = "global";

/// The open/close choice offered after a successful location check.
pub type ActionChoice = ActionPair;

/// A verification link for the presentation layer to send to the user.
#[derive(Debug, Clone)]
pub struct VerificationTicket {
    /// The location verification token.
    pub token: TokenId,
    /// `verify_url_base?token=<id>`. Contains the full token.
    pub url: String,
    /// When the link stops working.
    pub expires_at: DateTime<Utc>,
}

/// Reply to a location submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeofenceSubmission {
    /// Whether the location was accepted.
    pub ok: bool,
    /// Text for the user.
    pub message: String,
}

impl From<&Result<ActionChoice>> for GeofenceSubmission {
    fn from(result: &Result<ActionChoice>) -> Self {
        match result {
            Ok(_) => Self { ok: true, message: "Location verified. Choose an action.".into() },
            Err(err) => Self { ok: false, message: err.user_message().into() },
        }
    }
}

/// Reply to an action selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    /// Whether the command was sent to the gate.
    pub ok: bool,
    /// Text for the user.
    pub message: String,
}

impl From<&Result<Command>> for ActionOutcome {
    fn from(result: &Result<Command>) -> Self {
        match result {
            Ok(Command::Open) => Self { ok: true, message: "The gate is opening.".into() },
            Ok(Command::Close) => Self { ok: true, message: "The gate is closing.".into() },
            Err(err) => Self { ok: false, message: err.user_message().into() },
        }
    }
}

/// Turns "owner asked for the gate" into "actuator command authorized".
///
/// Generic over the cache `B`, the actuator `A`, and the user directory `U`.
/// The same cache holds tokens and rate-limit counters. Starting a
/// verification and submitting a location each have their own per-owner
/// limit, and both also count against one global limit.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use geogate_authz::{
///     Actuator, ActuatorError, AuthorizationFlow, Command, GateConfig, StaticUserDirectory,
/// };
/// use geogate_cache::MemoryBackend;
///
/// struct Gate;
///
/// #[async_trait]
/// impl Actuator for Gate {
///     async fn publish(&self, command: Command) -> Result<(), ActuatorError> {
///         println!("gate {}", command.device_payload());
///         Ok(())
///     }
/// }
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let flow = AuthorizationFlow::new(
///     MemoryBackend::new(),
///     Gate,
///     StaticUserDirectory::with_owners(["U1"]),
///     &GateConfig::default(),
/// )
/// .unwrap();
///
/// let ticket = flow.request_action("U1").await.unwrap();
/// let choice = flow.submit_location(ticket.token.as_str(), 24.79155, 120.99442, 10.0).await.unwrap();
/// assert_eq!(flow.submit_action(choice.open.as_str(), Command::Open).await.unwrap(), Command::Open);
///
/// // The close half of the pair died with the open half.
/// assert!(flow.submit_action(choice.close.as_str(), Command::Close).await.is_err());
/// # });
/// ```
#[derive(Debug)]
pub struct AuthorizationFlow<B, A, U> {
    tokens: TokenStore<B>,
    limiter: FixedWindowLimiter<B>,
    location_limiter: FixedWindowLimiter<B>,
    global_limiter: FixedWindowLimiter<B>,
    geofence: Geofence,
    config: TokenConfig,
    actuator: A,
    directory: U,
}

impl<B, A, U> AuthorizationFlow<B, A, U>
where
    B: CacheBackend + Clone,
    A: Actuator,
    U: UserDirectory,
{
    /// Wires a flow to its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn new(
        backend: B,
        actuator: A,
        directory: U,
        config: &GateConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            tokens: TokenStore::new(backend.clone()),
            limiter: FixedWindowLimiter::new(backend.clone(), *config.rate_limit()),
            location_limiter: FixedWindowLimiter::new(
                backend.clone(),
                *config.location_rate_limit(),
            ),
            global_limiter: FixedWindowLimiter::new(backend, *config.global_rate_limit()),
            geofence: config.geofence().geofence()?,
            config: config.tokens().clone(),
            actuator,
            directory,
        })
    }

    /// The token store.
    #[must_use]
    pub fn tokens(&self) -> &TokenStore<B> {
        &self.tokens
    }

    /// The per-owner limiter for [`request_action`](Self::request_action).
    #[must_use]
    pub fn limiter(&self) -> &FixedWindowLimiter<B> {
        &self.limiter
    }

    /// The per-owner limiter for [`submit_location`](Self::submit_location).
    #[must_use]
    pub fn location_limiter(&self) -> &FixedWindowLimiter<B> {
        &self.location_limiter
    }

    /// The limiter shared by all owners.
    #[must_use]
    pub fn global_limiter(&self) -> &FixedWindowLimiter<B> {
        &self.global_limiter
    }

    /// The active geofence.
    #[must_use]
    pub fn geofence(&self) -> &Geofence {
        &self.geofence
    }

    /// The actuator.
    #[must_use]
    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// The user directory.
    #[must_use]
    pub fn directory(&self) -> &U {
        &self.directory
    }

    /// Health of the token cache.
    ///
    /// # Errors
    ///
    /// Returns the backend error if the health check itself fails.
    pub async fn health(&self) -> CacheResult<HealthStatus> {
        self.tokens.backend().health_check().await
    }

    /// Entry point for an owner asking to operate the gate.
    ///
    /// Counts the request against the owner's and the global rate limit,
    /// checks the user directory, then starts a verification.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::RateLimitExceeded`] if either limit is exhausted.
    /// - [`AuthzError::NotAllowed`] if the directory denies the owner or
    ///   cannot be consulted.
    /// - [`AuthzError::Storage`] if the token cannot be written.
    #[tracing::instrument(skip(self))]
    pub async fn request_action(&self, owner: &str) -> Result<VerificationTicket> {
        self.admit(&self.limiter, &format!("request:{owner}")).await?;

        match self.directory.is_allowed(owner).await {
            Ok(true) => {},
            Ok(false) => {
                tracing::info!("owner not in directory");
                return Err(AuthzError::NotAllowed);
            },
            Err(err) => {
                tracing::error!(error = %err, "user directory unavailable, denying request");
                return Err(AuthzError::NotAllowed);
            },
        }

        self.start_verification(owner).await
    }

    /// Issues a location verification token for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Storage`] if the token cannot be written.
    #[tracing::instrument(skip(self))]
    pub async fn start_verification(&self, owner: &str) -> Result<VerificationTicket> {
        let issued = self
            .tokens
            .issue(TokenKind::LocationVerify, owner, self.config.verify_ttl(), None)
            .await?;
        let url = format!("{}?token={}", self.config.verify_url_base(), issued.id.as_str());
        tracing::info!(token = %issued.id, "verification started");
        Ok(VerificationTicket { token: issued.id, url, expires_at: issued.expires_at })
    }

    /// Checks a reported location against the geofence.
    ///
    /// The verification token is consumed first, whatever the outcome. The
    /// submission then counts against the token owner's location limit and
    /// the global limit. Under [`VerifyRetryPolicy::RetainOnFailure`] the
    /// token is put back after a rate-limited, out-of-range, or inaccurate
    /// submission.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::InvalidOrExpiredToken`] or [`AuthzError::KindMismatch`]
    ///   if the token cannot be redeemed.
    /// - [`AuthzError::InvalidCoordinates`] if the point is not on Earth.
    /// - [`AuthzError::RateLimitExceeded`] if either limit is exhausted.
    /// - [`AuthzError::InaccurateLocation`] or [`AuthzError::OutOfRange`] if
    ///   the geofence rejects the location.
    /// - [`AuthzError::Storage`] if the cache fails.
    #[tracing::instrument(skip_all, fields(accuracy_m = accuracy_m))]
    pub async fn submit_location(
        &self,
        token: &str,
        lat: f64,
        lng: f64,
        accuracy_m: f64,
    ) -> Result<ActionChoice> {
        let id = TokenId::parse(token)?;
        let record = self.tokens.consume(&id, TokenKind::LocationVerify).await?;

        let point = Coordinate::new(lat, lng)?;

        if let Err(err) =
            self.admit(&self.location_limiter, &format!("location:{}", record.owner)).await
        {
            self.retain_after_rejection(&id, &record).await;
            return Err(err);
        }

        let verdict = self.geofence.evaluate(point, accuracy_m);
        match verdict.into_result() {
            Ok(distance_km) => {
                tracing::info!(owner = %record.owner, distance_km, "location verified");
                self.tokens.issue_pair(&record.owner, self.config.action_ttl()).await
            },
            Err(err) => {
                tracing::info!(owner = %record.owner, ?verdict, "location rejected");
                self.retain_after_rejection(&id, &record).await;
                Err(err)
            },
        }
    }

    /// Redeems an action token and drives the gate.
    ///
    /// `command` selects the token kind expected. The redeemed token must
    /// also claim its verification's group: whichever half of a pair claims
    /// it first revokes the other, and a half that loses that race fails
    /// without reaching the actuator. The token stays spent if the actuator
    /// fails.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::InvalidOrExpiredToken`] or [`AuthzError::KindMismatch`]
    ///   if the token cannot be redeemed.
    /// - [`AuthzError::ActuatorUnreachable`] if the gate could not be driven.
    /// - [`AuthzError::Storage`] if the cache fails.
    pub async fn submit_action(&self, token: &str, command: Command) -> Result<Command> {
        self.redeem_action(None, token, command).await
    }

    /// Like [`submit_action`](Self::submit_action), but also requires the
    /// token to belong to `presenter`.
    ///
    /// A token presented by anyone else is spent and its group revoked; the
    /// caller sees [`AuthzError::InvalidOrExpiredToken`].
    ///
    /// # Errors
    ///
    /// As [`submit_action`](Self::submit_action).
    pub async fn submit_action_as(
        &self,
        presenter: &str,
        token: &str,
        command: Command,
    ) -> Result<Command> {
        self.redeem_action(Some(presenter), token, command).await
    }

    /// Counts one request against `limiter` under `key`, then against the
    /// global limit. An owner already over its own limit is not charged
    /// globally.
    async fn admit(&self, limiter: &FixedWindowLimiter<B>, key: &str) -> Result<()> {
        for (limiter, key) in [(limiter, key), (&self.global_limiter, GLOBAL_RATE_KEY)] {
            let RateDecision { allowed, count, retry_after, .. } = limiter.decide(key).await;
            if !allowed {
                let global = key == GLOBAL_RATE_KEY;
                tracing::info!(count, global, "rate limit exceeded");
                return Err(AuthzError::RateLimitExceeded {
                    retry_after: retry_after.unwrap_or_else(|| limiter.config().window()),
                });
            }
        }
        Ok(())
    }

    async fn retain_after_rejection(&self, id: &TokenId, record: &TokenRecord) {
        if self.config.verify_retry() == VerifyRetryPolicy::RetainOnFailure
            && let Err(err) = self.tokens.restore(id, record).await
        {
            tracing::warn!(error = %err, "failed to restore verification token");
        }
    }

    #[tracing::instrument(skip(self, presenter, token), fields(command = %command))]
    async fn redeem_action(
        &self,
        presenter: Option<&str>,
        token: &str,
        command: Command,
    ) -> Result<Command> {
        let id = TokenId::parse(token)?;
        let record = self.tokens.consume(&id, command.token_kind()).await?;

        if let Some(correlation) = &record.correlation_id {
            fail_point!("authz-before-sibling-revoke", |_| {
                Err(AuthzError::Storage(geogate_cache::CacheError::internal(
                    "interrupted before sibling revoke",
                )))
            });
            if self.tokens.revoke_group(correlation).await?.is_none() {
                tracing::info!(token = %id, "sibling already redeemed");
                return Err(AuthzError::InvalidOrExpiredToken);
            }
        }

        if let Some(presenter) = presenter
            && presenter != record.owner
        {
            tracing::warn!(token = %id, "action token presented by another user");
            return Err(AuthzError::InvalidOrExpiredToken);
        }

        self.actuator.publish(command).await.map_err(|err| {
            tracing::error!(owner = %record.owner, error = %err, "actuator unreachable after token spent");
            AuthzError::ActuatorUnreachable(err)
        })?;

        tracing::info!(owner = %record.owner, payload = command.device_payload(), "gate command published");
        Ok(command)
    }
}
