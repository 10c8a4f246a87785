//! Circuit breaker guarding the distributed cache.
//!
//! Once the distributed store has failed, [`FallbackBackend`](crate::FallbackBackend)
//! stops sending it traffic for a cooldown period and serves from its local
//! store instead. After the cooldown a single probe is let through; if it
//! succeeds the breaker closes and traffic returns to the distributed store.
//!
//! ```text
//! ┌────────┐  failure_threshold  ┌──────┐     cooldown     ┌──────────┐
//! │ Closed │ ──────reached─────→ │ Open │ ────elapsed────→ │ HalfOpen │
//! └────────┘                     └──────┘ ←──probe fails── └──────────┘
//!      ↑                                                        │
//!      └────────────── success_threshold reached ───────────────┘
//! ```
//!
//! Transitions out of `Open` are lazy: they happen inside
//! [`CircuitBreaker::allow_request`], so no timer task is needed. Time is read
//! from [`tokio::time::Instant`].

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::ConfigError;

/// Default number of consecutive failures that opens the circuit.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 1;

/// Default time the circuit stays open before a probe is allowed.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Default number of successful probes that closes a half-open circuit.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 1;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests go to the guarded backend.
    Closed,
    /// Requests are diverted until `until`.
    Open {
        /// When probing may begin.
        until: Instant,
    },
    /// Probe requests are let through to test recovery.
    HalfOpen,
}

impl CircuitState {
    /// Short name used in logs and health details.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open { .. } => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds for a [`CircuitBreaker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: u32,
    cooldown: Duration,
    success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

#[bon::bon]
impl CircuitBreakerConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either threshold is zero or `cooldown` is
    /// zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_FAILURE_THRESHOLD)] failure_threshold: u32,
        #[builder(default = DEFAULT_COOLDOWN)] cooldown: Duration,
        #[builder(default = DEFAULT_SUCCESS_THRESHOLD)] success_threshold: u32,
    ) -> Result<Self, ConfigError> {
        if failure_threshold == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "failure_threshold",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if cooldown.is_zero() {
            return Err(ConfigError::MustBePositive { field: "cooldown", value: "0s".into() });
        }
        if success_threshold == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "success_threshold",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(Self { failure_threshold, cooldown, success_threshold })
    }

    /// Consecutive failures that open the circuit.
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// How long the circuit stays open.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Successful probes that close the circuit.
    #[must_use]
    pub fn success_threshold(&self) -> u32 {
        self.success_threshold
    }
}

#[derive(Debug)]
struct Inner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: u32,
    probe_successes: u32,
    transitions: u64,
    diverted: u64,
    probes: u64,
}

impl Inner {
    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open { until: now + self.config.cooldown };
        self.probe_successes = 0;
        self.transitions += 1;
    }

    fn effective_state(&self, now: Instant) -> CircuitState {
        match self.state {
            CircuitState::Open { until } if now >= until => CircuitState::HalfOpen,
            other => other,
        }
    }
}

/// Point-in-time view of breaker counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    /// Current state.
    pub state: CircuitState,
    /// Number of state changes since creation.
    pub transitions: u64,
    /// Requests turned away while open.
    pub diverted: u64,
    /// Requests admitted as half-open probes.
    pub probes: u64,
    /// Current run of consecutive failures.
    pub consecutive_failures: u32,
}

/// Thread-safe circuit breaker. Clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                state: CircuitState::Closed,
                failures: 0,
                probe_successes: 0,
                transitions: 0,
                diverted: 0,
                probes: 0,
            })),
        }
    }

    /// Returns `true` if the guarded backend should be tried.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here and
    /// admits the caller as a probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                inner.probes += 1;
                true
            },
            CircuitState::Open { until } if Instant::now() >= until => {
                inner.state = CircuitState::HalfOpen;
                inner.probe_successes = 0;
                inner.transitions += 1;
                inner.probes += 1;
                tracing::info!(new_state = "half_open", "probing distributed cache");
                true
            },
            CircuitState::Open { .. } => {
                inner.diverted += 1;
                false
            },
        }
    }

    /// Records a successful call to the guarded backend.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.probe_successes += 1;
                if inner.probe_successes >= inner.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.probe_successes = 0;
                    inner.transitions += 1;
                    tracing::info!(
                        new_state = "closed",
                        backend_degraded = false,
                        "distributed cache recovered",
                    );
                }
            },
            CircuitState::Open { .. } => {},
        }
    }

    /// Records a transient failure of the guarded backend.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= inner.config.failure_threshold {
                    inner.open(now);
                    tracing::warn!(
                        consecutive_failures = inner.failures,
                        cooldown_secs = inner.config.cooldown.as_secs(),
                        "circuit opened",
                    );
                }
            },
            CircuitState::HalfOpen => {
                inner.open(now);
                tracing::warn!(
                    cooldown_secs = inner.config.cooldown.as_secs(),
                    "probe failed, circuit re-opened",
                );
            },
            CircuitState::Open { .. } => {},
        }
    }

    /// Current state, reporting an elapsed `Open` as `HalfOpen` without
    /// transitioning.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().effective_state(Instant::now())
    }

    /// Returns `true` unless the circuit is closed.
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.state() != CircuitState::Closed
    }

    /// Returns a snapshot of the breaker counters.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.effective_state(Instant::now()),
            transitions: inner.transitions,
            diverted: inner.diverted,
            probes: inner.probes,
            consecutive_failures: inner.failures,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rstest::rstest;
    use tokio::time::advance;

    use super::*;

    fn breaker(failures: u32, cooldown_secs: u64, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::builder()
                .failure_threshold(failures)
                .cooldown(Duration::from_secs(cooldown_secs))
                .success_threshold(successes)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn default_opens_on_first_failure() {
        let cb = CircuitBreaker::default();
        assert!(cb.allow_request());

        cb.record_failure();
        assert!(matches!(cb.state(), CircuitState::Open { .. }));
        assert!(!cb.allow_request());
        assert!(cb.is_tripped());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_run() {
        let cb = breaker(3, 30, 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert!(matches!(cb.state(), CircuitState::Open { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_then_probe_closes() {
        let cb = CircuitBreaker::default();
        cb.record_failure();

        advance(Duration::from_secs(29)).await;
        assert!(!cb.allow_request());

        advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.is_tripped());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_restarts_cooldown() {
        let cb = CircuitBreaker::default();
        cb.record_failure();
        advance(DEFAULT_COOLDOWN).await;
        assert!(cb.allow_request());

        cb.record_failure();
        assert!(!cb.allow_request());

        advance(Duration::from_secs(15)).await;
        assert!(!cb.allow_request());
        advance(Duration::from_secs(15)).await;
        assert!(cb.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_needs_success_threshold() {
        let cb = breaker(1, 5, 2);
        cb.record_failure();
        advance(Duration::from_secs(5)).await;
        assert!(cb.allow_request());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_count_transitions_and_diversions() {
        let cb = CircuitBreaker::default();
        cb.record_failure();
        assert!(!cb.allow_request());
        assert!(!cb.allow_request());

        advance(DEFAULT_COOLDOWN).await;
        assert!(cb.allow_request());
        cb.record_success();

        let m = cb.metrics();
        assert_eq!(m.state, CircuitState::Closed);
        // closed -> open -> half_open -> closed
        assert_eq!(m.transitions, 3);
        assert_eq!(m.diverted, 2);
        assert_eq!(m.probes, 1);
        assert_eq!(m.consecutive_failures, 0);
    }

    #[test]
    fn builder_defaults() {
        let config = CircuitBreakerConfig::builder().build().unwrap();
        assert_eq!(config, CircuitBreakerConfig::default());
        assert_eq!(config.failure_threshold(), 1);
        assert_eq!(config.cooldown(), Duration::from_secs(30));
        assert_eq!(config.success_threshold(), 1);
    }

    #[rstest]
    #[case::failure_threshold(CircuitBreakerConfig::builder().failure_threshold(0).build())]
    #[case::cooldown(CircuitBreakerConfig::builder().cooldown(Duration::ZERO).build())]
    #[case::success_threshold(CircuitBreakerConfig::builder().success_threshold(0).build())]
    fn zero_values_rejected(#[case] result: Result<CircuitBreakerConfig, ConfigError>) {
        assert!(result.is_err());
    }

    #[test]
    fn state_names() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::HalfOpen.as_str(), "half_open");
    }
}
