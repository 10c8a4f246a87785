//! Who may use the gate.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use geogate_cache::BoxError;
use parking_lot::RwLock;
use thiserror::Error;

/// A user directory lookup failed.
#[derive(Debug, Clone, Error)]
#[error("user directory unavailable: {message}")]
pub struct DirectoryError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl DirectoryError {
    /// Creates an error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), source: None }
    }

    /// Creates an error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self { message: message.into(), source: Some(Arc::new(source)) }
    }
}

/// Decides whether an owner is entitled to request gate actions.
///
/// Callers treat an error as a denial.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns `true` if `owner` may use the gate.
    async fn is_allowed(&self, owner: &str) -> Result<bool, DirectoryError>;
}

#[async_trait]
impl<U: UserDirectory + ?Sized> UserDirectory for Arc<U> {
    async fn is_allowed(&self, owner: &str) -> Result<bool, DirectoryError> {
        (**self).is_allowed(owner).await
    }
}

/// An in-memory allow list. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    owners: Arc<RwLock<HashSet<String>>>,
}

impl StaticUserDirectory {
    /// Creates an empty directory that denies everyone.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory allowing exactly `owners`.
    pub fn with_owners<I, S>(owners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { owners: Arc::new(RwLock::new(owners.into_iter().map(Into::into).collect())) }
    }

    /// Allows `owner`. Returns `false` if already allowed.
    pub fn allow(&self, owner: impl Into<String>) -> bool {
        self.owners.write().insert(owner.into())
    }

    /// Revokes `owner`. Returns `false` if it was not allowed.
    pub fn revoke(&self, owner: &str) -> bool {
        self.owners.write().remove(owner)
    }

    /// Number of allowed owners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.read().len()
    }

    /// Returns `true` if nobody is allowed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.read().is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn is_allowed(&self, owner: &str) -> Result<bool, DirectoryError> {
        Ok(self.owners.read().contains(owner))
    }
}
