//! Fan-out of framework events to receivers and inline listeners.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::event::FrameworkEvent;
use crate::subscriber::SubscriberRegistry;

/// Events buffered per receiver before a slow one starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The framework's event bus.
///
/// Async receivers get events through a broadcast channel, in publish order.
/// Synchronous listeners in the [`SubscriberRegistry`] are called inline on
/// the publishing task. Clones share both.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<FrameworkEvent>>,
    registry: Arc<SubscriberRegistry>,
    capacity: usize,
}

impl EventBus {
    /// Bus buffering [`DEFAULT_CHANNEL_CAPACITY`] events.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Bus buffering `capacity` events per receiver (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            registry: Arc::new(SubscriberRegistry::new()),
            capacity: capacity.max(1),
        }
    }

    /// Deliver `event` to every receiver, then to the inline listeners.
    ///
    /// Returns how many async receivers were handed the event.
    pub fn publish(&self, event: FrameworkEvent) -> usize {
        let event = Arc::new(event);
        let kind = event.event_type();

        let delivered = match self.sender.send(Arc::clone(&event)) {
            Ok(receivers) => {
                debug!(event_type = kind, receivers, "Published framework event");
                receivers
            },
            Err(_) => {
                trace!(event_type = kind, "Framework event had no receivers");
                0
            },
        };

        self.registry.notify(&event);
        delivered
    }

    /// Subscribe to every event.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), None)
    }

    /// Subscribe to events of the given types (see
    /// [`FrameworkEvent::event_type`]).
    #[must_use]
    pub fn subscribe_types(&self, types: &[&'static str]) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), Some(types.to_vec()))
    }

    /// Inline listeners, shared by every clone of this bus.
    #[must_use]
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Receivers plus inline listeners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .receiver_count()
            .saturating_add(self.registry.len())
    }

    /// Per-receiver buffer size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Async end of an [`EventBus`] subscription, optionally limited to some
/// event types.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<FrameworkEvent>>,
    types: Option<Vec<&'static str>>,
}

impl EventReceiver {
    fn new(
        receiver: broadcast::Receiver<Arc<FrameworkEvent>>,
        types: Option<Vec<&'static str>>,
    ) -> Self {
        Self { receiver, types }
    }

    fn matches(&self, event: &FrameworkEvent) -> bool {
        self.types
            .as_ref()
            .is_none_or(|types| types.contains(&event.event_type()))
    }

    /// Receive the next matching event.
    ///
    /// Returns `None` once the bus is gone. Lagging receivers skip the
    /// overwritten events and keep going.
    pub async fn recv(&mut self) -> Option<Arc<FrameworkEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Receiver fell behind; oldest events discarded");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive the next matching event without blocking.
    pub fn try_recv(&mut self) -> Option<Arc<FrameworkEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                },
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Receiver fell behind; oldest events discarded");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Drain every matching event currently queued.
    pub fn drain(&mut self) -> Vec<Arc<FrameworkEvent>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;

    fn started() -> FrameworkEvent {
        FrameworkEvent::FrameworkStarted {
            metadata: EventMetadata::new("test"),
            version: "0.1.0".to_string(),
        }
    }

    fn level(to: u32) -> FrameworkEvent {
        FrameworkEvent::StartLevelChanged {
            metadata: EventMetadata::new("test"),
            from: 0,
            to,
        }
    }

    #[tokio::test]
    async fn test_new_bus_is_empty() {
        let bus = EventBus::default();
        assert_eq!(bus.capacity(), DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        assert_eq!(bus.publish(started()), 1);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type(), "framework_started");
    }

    #[tokio::test]
    async fn test_publish_without_receivers() {
        let bus = EventBus::with_capacity(0);
        assert_eq!(bus.capacity(), 1);
        assert_eq!(bus.publish(started()), 0);
    }

    #[tokio::test]
    async fn test_type_filter() {
        let bus = EventBus::new();
        let mut levels = bus.subscribe_types(&["start_level_changed"]);

        bus.publish(started());
        bus.publish(level(2));

        let event = levels.recv().await.unwrap();
        assert!(matches!(*event, FrameworkEvent::StartLevelChanged { to: 2, .. }));
        assert!(levels.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_drain_preserves_order() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        bus.publish(level(1));
        bus.publish(level(2));
        bus.publish(level(3));

        let tos: Vec<u32> = receiver
            .drain()
            .iter()
            .filter_map(|e| match **e {
                FrameworkEvent::StartLevelChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect();
        assert_eq!(tos, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_lagged_receiver_continues() {
        let bus = EventBus::with_capacity(2);
        let mut receiver = bus.subscribe();
        for to in 1..=5 {
            bus.publish(level(to));
        }
        let event = receiver.recv().await.unwrap();
        assert!(matches!(*event, FrameworkEvent::StartLevelChanged { to: 4, .. }));
    }

    #[tokio::test]
    async fn test_cloned_bus_shares_registry() {
        use crate::subscriber::FilterSubscriber;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let bus = EventBus::new();
        let cloned = bus.clone();

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);
        cloned
            .registry()
            .register(Arc::new(FilterSubscriber::new("count", move |_| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            })));

        bus.publish(started());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
