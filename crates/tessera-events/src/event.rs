//! Framework event types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tessera_core::{ResourceId, ResourceState};
use uuid::Uuid;

/// Metadata attached to every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Correlation ID linking events of one operation (a bootstrap run, a
    /// start-level walk).
    pub correlation_id: Option<Uuid>,
    /// Source component that generated the event.
    pub source: String,
}

impl EventMetadata {
    /// Create new event metadata.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id: None,
            source: source.into(),
        }
    }

    /// Set correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// Phases of the bootstrap pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    /// Installing auto-install and auto-start locations.
    Install,
    /// Resolving the auto-start cohort.
    Resolve,
    /// Activating persistently-started bundles.
    Activate,
    /// Terminal.
    Complete,
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Install => "INSTALL",
            Self::Resolve => "RESOLVE",
            Self::Activate => "ACTIVATE",
            Self::Complete => "COMPLETE",
        };
        f.write_str(name)
    }
}

/// All events published by the framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FrameworkEvent {
    // ========== Framework Lifecycle ==========
    /// The framework finished starting.
    FrameworkStarted {
        /// Event metadata.
        metadata: EventMetadata,
        /// Framework version.
        version: String,
    },

    /// The framework stopped.
    FrameworkStopped {
        /// Event metadata.
        metadata: EventMetadata,
    },

    /// A bundle or framework operation failed.
    ///
    /// Per-bundle failures during bootstrap and start-level walks are
    /// reported only through this event.
    FrameworkError {
        /// Event metadata.
        metadata: EventMetadata,
        /// The affected bundle, if any.
        bundle_id: Option<ResourceId>,
        /// What was being done (`install`, `start`, `stop`, ...).
        operation: String,
        /// Error message.
        message: String,
    },

    // ========== Bundles ==========
    /// A bundle changed lifecycle state.
    BundleStateChanged {
        /// Event metadata.
        metadata: EventMetadata,
        /// The bundle.
        bundle_id: ResourceId,
        /// Its symbolic name.
        symbolic_name: String,
        /// Previous state.
        from: ResourceState,
        /// New state.
        to: ResourceState,
    },

    // ========== Start Levels ==========
    /// The framework start level changed.
    StartLevelChanged {
        /// Event metadata.
        metadata: EventMetadata,
        /// Level before the walk.
        from: u32,
        /// Level after the walk.
        to: u32,
    },

    // ========== Bootstrap ==========
    /// The bootstrap pipeline entered a phase.
    BootstrapPhaseChanged {
        /// Event metadata.
        metadata: EventMetadata,
        /// The phase entered.
        phase: BootstrapPhase,
        /// Bundles handed to the phase.
        cohort: usize,
    },

    /// The bootstrap pipeline finished.
    BootstrapComplete {
        /// Event metadata.
        metadata: EventMetadata,
        /// Bundles installed.
        installed: usize,
        /// Bundles resolved.
        resolved: usize,
        /// Bundles activated.
        activated: usize,
        /// Install, resolve and activation failures combined.
        failures: usize,
    },
}

impl FrameworkEvent {
    /// Get the event metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::FrameworkStarted { metadata, .. }
            | Self::FrameworkStopped { metadata }
            | Self::FrameworkError { metadata, .. }
            | Self::BundleStateChanged { metadata, .. }
            | Self::StartLevelChanged { metadata, .. }
            | Self::BootstrapPhaseChanged { metadata, .. }
            | Self::BootstrapComplete { metadata, .. } => metadata,
        }
    }

    /// Get the event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FrameworkStarted { .. } => "framework_started",
            Self::FrameworkStopped { .. } => "framework_stopped",
            Self::FrameworkError { .. } => "framework_error",
            Self::BundleStateChanged { .. } => "bundle_state_changed",
            Self::StartLevelChanged { .. } => "start_level_changed",
            Self::BootstrapPhaseChanged { .. } => "bootstrap_phase_changed",
            Self::BootstrapComplete { .. } => "bootstrap_complete",
        }
    }

    /// The bundle this event concerns, if any.
    #[must_use]
    pub fn bundle_id(&self) -> Option<ResourceId> {
        match self {
            Self::BundleStateChanged { bundle_id, .. } => Some(*bundle_id),
            Self::FrameworkError { bundle_id, .. } => *bundle_id,
            _ => None,
        }
    }

    /// Whether this is a failure report.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::FrameworkError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_is_tagged() {
        let event = FrameworkEvent::StartLevelChanged {
            metadata: EventMetadata::new("start-level"),
            from: 0,
            to: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "start_level_changed");
        assert_eq!(json["to"], 3);

        let parsed: FrameworkEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.event_type(), "start_level_changed");
    }

    #[test]
    fn test_bundle_id_accessor() {
        let changed = FrameworkEvent::BundleStateChanged {
            metadata: EventMetadata::default(),
            bundle_id: ResourceId::new(4),
            symbolic_name: "com.acme".into(),
            from: ResourceState::Installed,
            to: ResourceState::Resolved,
        };
        assert_eq!(changed.bundle_id(), Some(ResourceId::new(4)));
        assert!(!changed.is_error());

        let error = FrameworkEvent::FrameworkError {
            metadata: EventMetadata::default(),
            bundle_id: None,
            operation: "install".into(),
            message: "boom".into(),
        };
        assert_eq!(error.bundle_id(), None);
        assert!(error.is_error());
    }

    #[test]
    fn test_metadata_correlation() {
        let id = Uuid::new_v4();
        let meta = EventMetadata::new("bootstrap").with_correlation_id(id);
        let event = FrameworkEvent::FrameworkStopped { metadata: meta };
        assert_eq!(event.metadata().correlation_id, Some(id));
        assert_eq!(event.metadata().source, "bootstrap");
    }
}
