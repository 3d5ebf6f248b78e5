//! Recording event listener.

use std::sync::{Arc, Mutex, PoisonError};

use tessera_core::{ResourceId, ResourceState};
use tessera_events::{EventBus, EventSubscriber, FrameworkEvent};

/// A synchronous listener that keeps every event it sees.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<FrameworkEvent>>,
}

impl EventRecorder {
    /// Create a recorder and register it on `bus`.
    #[must_use]
    pub fn attach(bus: &EventBus) -> Arc<Self> {
        let recorder = Arc::new(Self::default());
        bus.registry().register(Arc::clone(&recorder) as Arc<dyn EventSubscriber>);
        recorder
    }

    /// All events so far, in publish order.
    #[must_use]
    pub fn events(&self) -> Vec<FrameworkEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Event type names so far, in publish order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events().iter().map(FrameworkEvent::event_type).collect()
    }

    /// States `bundle` moved into, in order.
    #[must_use]
    pub fn transitions(&self, bundle: ResourceId) -> Vec<ResourceState> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                FrameworkEvent::BundleStateChanged { bundle_id, to, .. } if *bundle_id == bundle => {
                    Some(*to)
                },
                _ => None,
            })
            .collect()
    }

    /// Bundles that became `state`, in order.
    #[must_use]
    pub fn bundles_entering(&self, state: ResourceState) -> Vec<ResourceId> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                FrameworkEvent::BundleStateChanged { bundle_id, to, .. } if *to == state => {
                    Some(*bundle_id)
                },
                _ => None,
            })
            .collect()
    }

    /// `(operation, message)` of every framework error.
    #[must_use]
    pub fn errors(&self) -> Vec<(String, String)> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                FrameworkEvent::FrameworkError {
                    operation, message, ..
                } => Some((operation.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    /// `(from, to)` of every start-level change.
    #[must_use]
    pub fn level_changes(&self) -> Vec<(u32, u32)> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                FrameworkEvent::StartLevelChanged { from, to, .. } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded events.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSubscriber for EventRecorder {
    fn on_event(&self, event: &FrameworkEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }

    fn name(&self) -> &'static str {
        "event-recorder"
    }
}
