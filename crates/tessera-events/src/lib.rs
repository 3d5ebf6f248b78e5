//! Tessera Events - Framework event bus for the Tessera module runtime.
//!
//! This crate provides:
//! - [`FrameworkEvent`], covering bundle state changes, framework errors,
//!   start-level changes and bootstrap progress
//! - A broadcast [`EventBus`] for async receivers
//! - A [`SubscriberRegistry`] for synchronous listeners
//!
//! # Example
//!
//! ```rust
//! use tessera_events::{EventBus, EventMetadata, FrameworkEvent};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(FrameworkEvent::StartLevelChanged {
//!     metadata: EventMetadata::new("start-level"),
//!     from: 0,
//!     to: 1,
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "start_level_changed");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod event;
mod subscriber;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{BootstrapPhase, EventMetadata, FrameworkEvent};
pub use subscriber::{
    EventFilter, EventSubscriber, FilterSubscriber, SubscriberId, SubscriberRegistry,
};
