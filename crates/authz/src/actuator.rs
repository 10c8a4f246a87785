//! The gate actuator seam.
//!
//! The flow only ever calls [`Actuator::publish`], after the action token has
//! been spent. Transport (broker, TLS, reconnection) belongs to the
//! implementation. [`RetryingActuator`] adds a bounded fixed-delay retry
//! around any implementation.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use fail::fail_point;
use geogate_cache::ConfigError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token::TokenKind;

/// Default number of publish attempts made by [`RetryingActuator`].
pub const DEFAULT_PUBLISH_ATTEMPTS: u32 = 3;

/// Default pause between publish attempts.
pub const DEFAULT_PUBLISH_DELAY: Duration = Duration::from_secs(1);

/// A gate command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    /// Raise the gate.
    Open,
    /// Lower the gate.
    Close,
}

impl Command {
    /// `"open"` or `"close"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }

    /// The payload the gate controller expects: `"up"` or `"down"`.
    #[must_use]
    pub fn device_payload(self) -> &'static str {
        match self {
            Self::Open => "up",
            Self::Close => "down",
        }
    }

    /// The action token kind that authorizes this command.
    #[must_use]
    pub fn token_kind(self) -> TokenKind {
        match self {
            Self::Open => TokenKind::ActionOpen,
            Self::Close => TokenKind::ActionClose,
        }
    }

    /// The command an action token kind authorizes, if any.
    #[must_use]
    pub fn from_token_kind(kind: TokenKind) -> Option<Self> {
        match kind {
            TokenKind::ActionOpen => Some(Self::Open),
            TokenKind::ActionClose => Some(Self::Close),
            TokenKind::LocationVerify => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by an [`Actuator`].
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ActuatorError {
    /// The actuator could not be reached. Worth retrying.
    #[error("actuator unreachable: {message}")]
    Unreachable {
        /// Description of the failure.
        message: String,
    },

    /// The actuator answered but refused the command. Not retried.
    #[error("actuator rejected command: {message}")]
    Rejected {
        /// Description of the refusal.
        message: String,
    },
}

impl ActuatorError {
    /// Creates an [`ActuatorError::Unreachable`].
    #[must_use]
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable { message: message.into() }
    }

    /// Creates an [`ActuatorError::Rejected`].
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }

    /// Returns `true` if another attempt could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

/// Drives the physical gate.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Sends `command` to the gate.
    #[must_use = "actuator failures must be reported to the user"]
    async fn publish(&self, command: Command) -> Result<(), ActuatorError>;
}

#[async_trait]
impl<A: Actuator + ?Sized> Actuator for Arc<A> {
    async fn publish(&self, command: Command) -> Result<(), ActuatorError> {
        (**self).publish(command).await
    }
}

/// Retries transient publish failures a bounded number of times with a
/// fixed pause between attempts.
#[derive(Debug, Clone)]
pub struct RetryingActuator<A> {
    inner: A,
    max_attempts: u32,
    delay: Duration,
}

#[bon::bon]
impl<A: Actuator> RetryingActuator<A> {
    /// Wraps `inner`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MustBePositive`] if `max_attempts` is zero.
    #[builder]
    pub fn new(
        inner: A,
        #[builder(default = DEFAULT_PUBLISH_ATTEMPTS)] max_attempts: u32,
        #[builder(default = DEFAULT_PUBLISH_DELAY)] delay: Duration,
    ) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::MustBePositive { field: "max_attempts", value: "0".into() });
        }
        Ok(Self { inner, max_attempts, delay })
    }

    /// The wrapped actuator.
    #[must_use]
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Total attempts per publish, including the first.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[async_trait]
impl<A: Actuator> Actuator for RetryingActuator<A> {
    #[tracing::instrument(skip(self), fields(max_attempts = self.max_attempts))]
    async fn publish(&self, command: Command) -> Result<(), ActuatorError> {
        let mut attempt = 1;
        loop {
            match self.inner.publish(command).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "publish succeeded after retry");
                    }
                    return Ok(());
                },
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    tracing::debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "publish failed, retrying",
                    );
                    fail_point!("actuator-before-retry");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                },
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "publish failed");
                    return Err(err);
                },
            }
        }
    }
}
