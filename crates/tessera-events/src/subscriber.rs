//! Synchronous event listeners.
//!
//! Listeners are called in registration order on the task that publishes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::event::FrameworkEvent;

/// Predicate deciding which events a closure listener sees.
pub type EventFilter = Box<dyn Fn(&FrameworkEvent) -> bool + Send + Sync>;

/// A listener called inline for every published event.
///
/// Listeners run on the publishing task and must return quickly. Work that
/// blocks belongs behind an [`EventReceiver`](crate::EventReceiver).
pub trait EventSubscriber: Send + Sync {
    /// Handle a published event.
    fn on_event(&self, event: &FrameworkEvent);

    /// Whether `event` should reach [`EventSubscriber::on_event`].
    fn accepts(&self, event: &FrameworkEvent) -> bool {
        let _ = event;
        true
    }

    /// Label for logs.
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "listener"
    }
}

/// Handle returned by [`SubscriberRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Registry of synchronous listeners.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriberId, Arc<dyn EventSubscriber>)>>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("listeners", &self.len())
            .finish_non_exhaustive()
    }
}

impl SubscriberRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener after every existing one.
    pub fn register(&self, listener: Arc<dyn EventSubscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(%id, listener = %listener.name(), "Listener registered");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if `id` was not registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    /// Deliver `event` to every accepting listener.
    ///
    /// The list is snapshotted first, so listeners may register or unregister
    /// while being notified. A panic in one listener is logged and the rest
    /// still run.
    pub fn notify(&self, event: &FrameworkEvent) {
        let snapshot: Vec<Arc<dyn EventSubscriber>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot.iter().filter(|l| l.accepts(event)) {
            let delivered = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
            if delivered.is_err() {
                warn!(
                    listener = %listener.name(),
                    event_type = %event.event_type(),
                    "Listener panicked; continuing with the rest"
                );
            }
        }
    }

    /// Registered listener count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A listener built from a closure and an optional filter.
pub struct FilterSubscriber<F>
where
    F: Fn(&FrameworkEvent) + Send + Sync,
{
    name: String,
    handler: F,
    filter: Option<EventFilter>,
}

impl<F> FilterSubscriber<F>
where
    F: Fn(&FrameworkEvent) + Send + Sync,
{
    /// Create a listener that accepts every event.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
            filter: None,
        }
    }

    /// Only accept events passing `filter`.
    #[must_use]
    pub fn with_filter(
        mut self,
        filter: impl Fn(&FrameworkEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }
}

impl<F> EventSubscriber for FilterSubscriber<F>
where
    F: Fn(&FrameworkEvent) + Send + Sync,
{
    fn on_event(&self, event: &FrameworkEvent) {
        (self.handler)(event);
    }

    fn accepts(&self, event: &FrameworkEvent) -> bool {
        self.filter.as_ref().is_none_or(|f| f(event))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
