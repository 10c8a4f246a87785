//! Token identifiers and the records they map to.
//!
//! A [`TokenId`] is 32 bytes from the operating system RNG, encoded as
//! URL-safe base64 without padding (43 characters). It is the only thing
//! handed to users; the [`TokenRecord`] it names lives in the cache and never
//! leaves this crate except through [`TokenStore::consume`](crate::TokenStore::consume).

use std::{fmt, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AuthzError, Result};

/// Number of random bytes in a token id.
pub const TOKEN_BYTES: usize = 32;

/// Length of an encoded token id.
pub const TOKEN_ID_LEN: usize = 43;

/// Characters of a token id shown in logs and `Debug` output.
const REDACTED_PREFIX_LEN: usize = 8;

/// What a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Permission to submit a location once.
    LocationVerify,
    /// Permission to open the gate once.
    ActionOpen,
    /// Permission to close the gate once.
    ActionClose,
}

impl TokenKind {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocationVerify => "location_verify",
            Self::ActionOpen => "action_open",
            Self::ActionClose => "action_close",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque single-use token identifier.
///
/// `Debug` and `Display` show only the first eight characters, so ids can be
/// put in log fields without handing out a live credential. Use
/// [`as_str`](Self::as_str) to get the full value for the user.
#[derive(Clone, PartialEq, Eq, Hash, Zeroize, ZeroizeOnDrop)]
pub struct TokenId(String);

impl TokenId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let id = URL_SAFE_NO_PAD.encode(bytes);
        bytes.zeroize();
        Self(id)
    }

    /// Parses a user-supplied id.
    ///
    /// Anything that could not have been produced by [`generate`](Self::generate)
    /// is reported as [`AuthzError::InvalidOrExpiredToken`], the same error an
    /// unknown id gets.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidOrExpiredToken`] if `raw` has the wrong
    /// length or contains characters outside the URL-safe base64 alphabet.
    pub fn parse(raw: &str) -> Result<Self> {
        let well_formed = raw.len() == TOKEN_ID_LEN
            && raw.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !well_formed {
            return Err(AuthzError::InvalidOrExpiredToken);
        }
        Ok(Self(raw.to_owned()))
    }

    /// The full id. Treat it as a secret.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first eight characters, for logs.
    #[must_use]
    pub fn redacted(&self) -> &str {
        self.0.get(..REDACTED_PREFIX_LEN).unwrap_or(self.0.as_str())
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({}…)", self.redacted())
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}…", self.redacted())
    }
}

/// Links the two action tokens minted by one successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random correlation id.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// The id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The stored state behind a token. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// What the token authorizes.
    pub kind: TokenKind,
    /// The user the token was issued to.
    pub owner: String,
    /// When the token was issued.
    pub created_at: DateTime<Utc>,
    /// When the token stops being valid.
    pub expires_at: DateTime<Utc>,
    /// Set for action tokens issued as a pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl TokenRecord {
    /// Builds a record valid for `ttl` from now.
    #[must_use]
    pub fn new(
        kind: TokenKind,
        owner: impl Into<String>,
        ttl: Duration,
        correlation_id: Option<CorrelationId>,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { kind, owner: owner.into(), created_at, expires_at, correlation_id }
    }

    /// Returns `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Time left before expiry, or `None` if already expired.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        (self.expires_at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
    }
}
