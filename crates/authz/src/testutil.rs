//! Shared test utilities for authorization testing.
//!
//! Feature-gated behind `testutil`. Enable it from `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! geogate-authz = { path = "../authz", features = ["testutil"] }
//! ```
//!
//! Provides stand-in collaborators ([`RecordingActuator`],
//! [`FailingActuator`], [`UnavailableDirectory`]), a ready-wired
//! [`test_flow`], and the [`assert_authz_error!`](crate::assert_authz_error)
//! macro.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use async_trait::async_trait;
use geogate_cache::CacheBackend;
use parking_lot::Mutex;

use crate::{
    actuator::{Actuator, ActuatorError, Command},
    config::{DEFAULT_TARGET_LAT, DEFAULT_TARGET_LNG, GateConfig},
    directory::{DirectoryError, StaticUserDirectory, UserDirectory},
    flow::AuthorizationFlow,
};

/// Owner allowed by [`test_flow`].
pub const TEST_OWNER: &str = "U-test-owner";

/// The default gate location, `(lat, lng)`.
pub const GATE: (f64, f64) = (DEFAULT_TARGET_LAT, DEFAULT_TARGET_LNG);

/// Roughly 1.1 km north of [`GATE`].
pub const FAR_AWAY: (f64, f64) = (DEFAULT_TARGET_LAT + 0.01, DEFAULT_TARGET_LNG);

/// A good GPS accuracy in meters.
pub const PRECISE_M: f64 = 10.0;

/// Records every published command. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    commands: Arc<Mutex<Vec<Command>>>,
}

impl RecordingActuator {
    /// Creates an actuator with an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands published so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().clone()
    }

    /// Device payloads published so far, in order.
    #[must_use]
    pub fn payloads(&self) -> Vec<&'static str> {
        self.commands.lock().iter().map(|c| c.device_payload()).collect()
    }
}

#[async_trait]
impl Actuator for RecordingActuator {
    async fn publish(&self, command: Command) -> Result<(), ActuatorError> {
        self.commands.lock().push(command);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum FailureMode {
    FirstN(u32),
    Always,
    Reject,
}

/// An actuator that fails in a scripted way and counts attempts.
///
/// Successful publishes are forwarded to an inner [`RecordingActuator`].
#[derive(Debug, Clone)]
pub struct FailingActuator {
    mode: FailureMode,
    attempts: Arc<AtomicU32>,
    recorder: RecordingActuator,
}

impl FailingActuator {
    fn with_mode(mode: FailureMode) -> Self {
        Self { mode, attempts: Arc::new(AtomicU32::new(0)), recorder: RecordingActuator::new() }
    }

    /// Unreachable for the first `n` attempts, then succeeds.
    #[must_use]
    pub fn failing_first(n: u32) -> Self {
        Self::with_mode(FailureMode::FirstN(n))
    }

    /// Always unreachable.
    #[must_use]
    pub fn always() -> Self {
        Self::with_mode(FailureMode::Always)
    }

    /// Always rejects the command.
    #[must_use]
    pub fn rejecting() -> Self {
        Self::with_mode(FailureMode::Reject)
    }

    /// Publish attempts so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Log of successful publishes.
    #[must_use]
    pub fn recorder(&self) -> &RecordingActuator {
        &self.recorder
    }
}

#[async_trait]
impl Actuator for FailingActuator {
    async fn publish(&self, command: Command) -> Result<(), ActuatorError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match self.mode {
            FailureMode::FirstN(n) if attempt > n => self.recorder.publish(command).await,
            FailureMode::FirstN(_) | FailureMode::Always => {
                Err(ActuatorError::unreachable("broker connection refused"))
            },
            FailureMode::Reject => Err(ActuatorError::rejected("device busy")),
        }
    }
}

/// A user directory whose backing store is down.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableDirectory;

#[async_trait]
impl UserDirectory for UnavailableDirectory {
    async fn is_allowed(&self, _owner: &str) -> Result<bool, DirectoryError> {
        Err(DirectoryError::new("database unavailable"))
    }
}

/// Builds a flow over `backend` with default configuration, a
/// [`RecordingActuator`], and a directory allowing only [`TEST_OWNER`].
///
/// # Panics
///
/// Panics if the default configuration fails to validate.
pub fn test_flow<B: CacheBackend + Clone>(
    backend: B,
) -> (AuthorizationFlow<B, RecordingActuator, StaticUserDirectory>, RecordingActuator) {
    test_flow_with_config(backend, &GateConfig::default())
}

/// Like [`test_flow`] with an explicit configuration.
///
/// # Panics
///
/// Panics if `config` fails to validate.
pub fn test_flow_with_config<B: CacheBackend + Clone>(
    backend: B,
    config: &GateConfig,
) -> (AuthorizationFlow<B, RecordingActuator, StaticUserDirectory>, RecordingActuator) {
    let actuator = RecordingActuator::new();
    let flow = AuthorizationFlow::new(
        backend,
        actuator.clone(),
        StaticUserDirectory::with_owners([TEST_OWNER]),
        config,
    )
    .expect("test configuration must be valid");
    (flow, actuator)
}

/// Assert that a result is `Err(AuthzError::<variant>)`.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use geogate_authz::{AuthzError, assert_authz_error};
///
/// let result: Result<(), AuthzError> = Err(AuthzError::NotAllowed);
/// assert_authz_error!(result, NotAllowed);
/// ```
#[macro_export]
macro_rules! assert_authz_error {
    ($result:expr, $variant:ident) => {
        match $result {
            Err($crate::error::AuthzError::$variant { .. }) => {},
            other => panic!(
                concat!("expected AuthzError::", stringify!($variant), ", got: {:?}"),
                other
            ),
        }
    };
}
