//! Framework error types.

use tessera_config::ConfigError;
use tessera_core::{CoreError, ResourceId, ResourceState};
use tessera_modules::ModuleError;
use tessera_resolver::ResolutionError;
use tessera_telemetry::TelemetryError;
use thiserror::Error;

/// Errors raised by bundle lifecycle operations and the framework facade.
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// Resolution or native binding failed; nothing was applied.
    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    /// Module composition failed.
    #[error("module error: {0}")]
    Module(#[from] ModuleError),

    /// The bundle is in a state that does not allow the operation.
    #[error("cannot {operation} bundle {bundle} in state {state}")]
    InvalidState {
        /// The bundle.
        bundle: ResourceId,
        /// Its current state.
        state: ResourceState,
        /// The rejected operation.
        operation: &'static str,
    },

    /// Fragments cannot be started or stopped.
    #[error("bundle {0} is a fragment and has no lifecycle of its own")]
    FragmentLifecycle(ResourceId),

    /// A bundle activator failed.
    #[error("activator of bundle {bundle} failed: {message}")]
    Activator {
        /// The bundle.
        bundle: ResourceId,
        /// The activator's error.
        message: String,
    },

    /// An operation exceeded its configured bound.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// The bounded operation.
        operation: String,
        /// The bound.
        timeout_ms: u64,
    },

    /// A deployment could not be loaded or installed.
    #[error("deployment '{location}' rejected: {message}")]
    Deployment {
        /// Location of the deployment.
        location: String,
        /// Why it was rejected.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging could not be set up.
    #[error("logging setup failed: {0}")]
    Telemetry(#[from] TelemetryError),

    /// No bundle with that id is installed.
    #[error("unknown bundle {0}")]
    UnknownBundle(ResourceId),

    /// The system bundle's start level is fixed.
    #[error("the start level of the system bundle cannot be changed")]
    SystemBundleStartLevel,

    /// Start levels of bundles must be at least 1.
    #[error("invalid start level {0}")]
    InvalidStartLevel(u32),

    /// The start-level worker is gone.
    #[error("start-level scheduler is not running")]
    SchedulerStopped,

    /// Invalid graph data.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl FrameworkError {
    pub(crate) fn timeout(operation: impl Into<String>, bound: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(bound.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Result type for framework operations.
pub type FrameworkResult<T> = Result<T, FrameworkError>;
