//! Health reporting for cache backends.
//!
//! [`CacheBackend::health_check`](crate::CacheBackend::health_check) returns a
//! [`HealthStatus`]. A [`FallbackBackend`](crate::FallbackBackend) that is
//! serving from its local store reports [`HealthState::Degraded`]: requests
//! still succeed, but state is no longer shared with other instances.

use std::{collections::BTreeMap, fmt, time::Duration};

/// Coarse health of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Fully operational.
    Healthy,
    /// Serving traffic with reduced guarantees (e.g. local fallback active).
    Degraded,
    /// Unable to serve traffic.
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of a single health check.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    state: HealthState,
    backend: &'static str,
    check_duration: Duration,
    reason: Option<String>,
    details: BTreeMap<&'static str, String>,
}

impl HealthStatus {
    /// Creates a healthy status for `backend`.
    #[must_use]
    pub fn healthy(backend: &'static str, check_duration: Duration) -> Self {
        Self::with_state(HealthState::Healthy, backend, check_duration, None)
    }

    /// Creates a degraded status with a reason.
    #[must_use]
    pub fn degraded(
        backend: &'static str,
        check_duration: Duration,
        reason: impl Into<String>,
    ) -> Self {
        Self::with_state(HealthState::Degraded, backend, check_duration, Some(reason.into()))
    }

    /// Creates an unhealthy status with a reason.
    #[must_use]
    pub fn unhealthy(
        backend: &'static str,
        check_duration: Duration,
        reason: impl Into<String>,
    ) -> Self {
        Self::with_state(HealthState::Unhealthy, backend, check_duration, Some(reason.into()))
    }

    fn with_state(
        state: HealthState,
        backend: &'static str,
        check_duration: Duration,
        reason: Option<String>,
    ) -> Self {
        Self { state, backend, check_duration, reason, details: BTreeMap::new() }
    }

    /// Adds a backend-specific detail, returning `self` for chaining.
    #[must_use]
    pub fn with_detail(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.details.insert(key, value.into());
        self
    }

    /// Returns the coarse state.
    #[must_use]
    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Returns `true` if the backend is fully healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == HealthState::Healthy
    }

    /// Returns `true` if the backend is degraded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.state == HealthState::Degraded
    }

    /// Identifier of the backend that produced this status.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// How long the check took.
    #[must_use]
    pub fn check_duration(&self) -> Duration {
        self.check_duration
    }

    /// The degradation or failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Looks up a backend-specific detail.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.backend, self.state)?;
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        write!(f, " ({}ms)", self.check_duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_has_no_reason() {
        let status = HealthStatus::healthy("memory", Duration::from_millis(1));
        assert!(status.is_healthy());
        assert!(!status.is_degraded());
        assert_eq!(status.reason(), None);
        assert_eq!(status.backend(), "memory");
    }

    #[test]
    fn degraded_carries_reason_and_details() {
        let status = HealthStatus::degraded("fallback", Duration::from_millis(3), "local store")
            .with_detail("circuit_state", "open");
        assert!(status.is_degraded());
        assert_eq!(status.reason(), Some("local store"));
        assert_eq!(status.detail("circuit_state"), Some("open"));
        assert_eq!(status.detail("missing"), None);
    }

    #[test]
    fn display_formats() {
        let healthy = HealthStatus::healthy("redis", Duration::from_millis(2));
        assert_eq!(healthy.to_string(), "redis healthy (2ms)");

        let unhealthy =
            HealthStatus::unhealthy("redis", Duration::from_secs(2), "connection refused");
        assert_eq!(unhealthy.to_string(), "redis unhealthy: connection refused (2000ms)");
        assert_eq!(unhealthy.state(), HealthState::Unhealthy);
    }
}
