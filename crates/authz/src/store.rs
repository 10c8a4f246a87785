//! Single-use token storage on a [`CacheBackend`].
//!
//! Every read of a token is destructive: [`TokenStore::consume`] is a single
//! atomic `take`, so with any number of concurrent redeemers exactly one
//! gets the record. There is deliberately no way to look at a token without
//! spending it.
//!
//! # Key layout
//!
//! | Key | Value | TTL |
//! |-----|-------|-----|
//! | `token:<id>` | JSON [`TokenRecord`] | token lifetime |
//! | `group:<correlation id>` | JSON list of member token ids | pair lifetime |

use std::time::Duration;

use chrono::{DateTime, Utc};
use geogate_cache::CacheBackend;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AuthzError, Result},
    token::{CorrelationId, TokenId, TokenKind, TokenRecord},
};

const TOKEN_PREFIX: &str = "token:";
const GROUP_PREFIX: &str = "group:";

/// A freshly issued token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The id to hand to the user.
    pub id: TokenId,
    /// When the token stops being valid.
    pub expires_at: DateTime<Utc>,
}

/// An open/close token pair minted from one verification.
#[derive(Debug, Clone)]
pub struct ActionPair {
    /// Token authorizing [`Command::Open`](crate::Command::Open).
    pub open: TokenId,
    /// Token authorizing [`Command::Close`](crate::Command::Close).
    pub close: TokenId,
    /// Shared by both tokens.
    pub correlation: CorrelationId,
    /// When both tokens stop being valid.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupRecord {
    members: Vec<String>,
}

/// Issues and redeems single-use tokens.
#[derive(Debug, Clone)]
pub struct TokenStore<B> {
    backend: B,
}

impl<B: CacheBackend> TokenStore<B> {
    /// Creates a store writing to `backend`.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The underlying cache.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Issues a token of `kind` for `owner`, valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Storage`] if the record could not be written.
    #[tracing::instrument(skip_all, fields(kind = %kind, ttl_s = ttl.as_secs()))]
    pub async fn issue(
        &self,
        kind: TokenKind,
        owner: &str,
        ttl: Duration,
        correlation: Option<CorrelationId>,
    ) -> Result<IssuedToken> {
        let id = TokenId::generate();
        let record = TokenRecord::new(kind, owner, ttl, correlation);
        self.backend.set_json(token_key(&id), &record, ttl).await?;
        tracing::debug!(token = %id, "token issued");
        Ok(IssuedToken { id, expires_at: record.expires_at })
    }

    /// Issues an [`ActionPair`] for `owner` and records the pair so that
    /// redeeming one half can revoke the other.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Storage`] if any write fails.
    #[tracing::instrument(skip_all, fields(ttl_s = ttl.as_secs()))]
    pub async fn issue_pair(&self, owner: &str, ttl: Duration) -> Result<ActionPair> {
        let correlation = CorrelationId::generate();
        let open = self.issue(TokenKind::ActionOpen, owner, ttl, Some(correlation.clone())).await?;
        let close =
            self.issue(TokenKind::ActionClose, owner, ttl, Some(correlation.clone())).await?;

        let group =
            GroupRecord { members: vec![open.id.as_str().to_owned(), close.id.as_str().to_owned()] };
        self.backend.set_json(group_key(&correlation), &group, ttl).await?;

        Ok(ActionPair { open: open.id, close: close.id, correlation, expires_at: open.expires_at })
    }

    /// Redeems a token, removing it from the store.
    ///
    /// A token of the wrong kind is still consumed. A record that outlived
    /// its `expires_at` is treated as absent even if the backend returned it.
    ///
    /// # Errors
    ///
    /// - [`AuthzError::InvalidOrExpiredToken`] if the token is unknown,
    ///   already consumed, or expired.
    /// - [`AuthzError::KindMismatch`] if it exists but is not `expected`.
    /// - [`AuthzError::Storage`] if the backend fails or the record cannot be
    ///   decoded.
    #[tracing::instrument(skip_all, fields(token = %id, expected = %expected))]
    pub async fn consume(&self, id: &TokenId, expected: TokenKind) -> Result<TokenRecord> {
        let taken: Option<TokenRecord> = self.backend.take_json(&token_key(id)).await?;
        let Some(record) = taken else {
            tracing::debug!("token absent");
            return Err(AuthzError::InvalidOrExpiredToken);
        };

        if record.is_expired() {
            tracing::debug!("token record past expiry");
            return Err(AuthzError::InvalidOrExpiredToken);
        }
        if record.kind != expected {
            tracing::warn!(actual = %record.kind, "token kind mismatch");
            return Err(AuthzError::KindMismatch { expected, actual: record.kind });
        }
        Ok(record)
    }

    /// Claims the group issued under `correlation` and deletes its member
    /// tokens.
    ///
    /// Taking the group entry is atomic, so among concurrent callers for the
    /// same group exactly one gets `Some(n)`, where `n` counts the member
    /// deletions that succeeded. Everyone else, and any caller after the
    /// group expired, gets `None`. Member deletions are best effort and
    /// their failures are only logged.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Storage`] if the group entry cannot be taken or
    /// decoded.
    #[tracing::instrument(skip_all, fields(correlation = %correlation))]
    pub async fn revoke_group(&self, correlation: &CorrelationId) -> Result<Option<usize>> {
        let taken: Option<GroupRecord> = self.backend.take_json(&group_key(correlation)).await?;
        let Some(group) = taken else {
            tracing::debug!("token group already claimed");
            return Ok(None);
        };

        let mut revoked = 0;
        for member in &group.members {
            let key = format!("{TOKEN_PREFIX}{member}").into_bytes();
            match self.backend.delete(&key).await {
                Ok(()) => revoked += 1,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to revoke sibling token");
                },
            }
        }
        Ok(Some(revoked))
    }

    /// Writes a consumed record back under `id` for the rest of its
    /// lifetime. Returns `false` if it has already expired.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Storage`] if the write fails.
    #[tracing::instrument(skip_all, fields(token = %id))]
    pub async fn restore(&self, id: &TokenId, record: &TokenRecord) -> Result<bool> {
        let Some(remaining) = record.remaining() else {
            return Ok(false);
        };
        self.backend.set_json(token_key(id), record, remaining).await?;
        Ok(true)
    }
}

fn token_key(id: &TokenId) -> Vec<u8> {
    format!("{TOKEN_PREFIX}{}", id.as_str()).into_bytes()
}

fn group_key(correlation: &CorrelationId) -> Vec<u8> {
    format!("{GROUP_PREFIX}{correlation}").into_bytes()
}
