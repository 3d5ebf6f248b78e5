//! Lifecycle transitions and error reporting on the event bus.

use std::fmt::Display;

use tessera_core::{Resource, ResourceId, ResourceState};
use tessera_events::{EventBus, EventMetadata, FrameworkEvent};
use tracing::{debug, warn};

/// Move `resource` to `to` and announce the change. Returns the previous
/// state; no event is published if the state did not change.
pub(crate) fn transition(bus: &EventBus, resource: &Resource, to: ResourceState) -> ResourceState {
    let from = resource.set_state(to);
    if from != to {
        debug!(bundle = %resource, %from, %to, "Bundle state changed");
        bus.publish(FrameworkEvent::BundleStateChanged {
            metadata: EventMetadata::new("lifecycle"),
            bundle_id: resource.id(),
            symbolic_name: resource.symbolic_name().to_owned(),
            from,
            to,
        });
    }
    from
}

/// Report a failure that is not returned to any caller.
pub(crate) fn report_error(
    bus: &EventBus,
    bundle: Option<ResourceId>,
    operation: &str,
    error: &dyn Display,
) {
    warn!(bundle = ?bundle, operation, error = %error, "Framework error");
    bus.publish(FrameworkEvent::FrameworkError {
        metadata: EventMetadata::new(operation),
        bundle_id: bundle,
        operation: operation.to_owned(),
        message: error.to_string(),
    });
}
