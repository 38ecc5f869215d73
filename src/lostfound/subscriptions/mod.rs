//! Live subscriptions
//!
//! Listener tasks push full snapshots of a collection to a callback, and the
//! [`SubscriptionManager`] ties each listener to the lifetime of the consumer
//! that observes it.

mod listener;
mod manager;
mod types;

pub(crate) use listener::spawn_listener;
pub use manager::SubscriptionManager;
pub use types::{ConsumerId, Feed, SlotState, SubscriptionHandle};
