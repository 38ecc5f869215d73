//! Keeps at most one live subscription per (consumer, feed) slot.
//!
//! Retargeting a feed (opening another conversation, say) releases the old
//! listener before the new one is installed, so a consumer never receives
//! callbacks from a stale target.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::types::{ConsumerId, Feed, SlotState, SubscriptionHandle};

#[derive(Debug)]
pub struct SubscriptionManager {
    slots: DashMap<(ConsumerId, Feed), SubscriptionHandle>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Releases whatever occupies the slot, then installs `subscription`.
    pub fn replace(&self, consumer: &ConsumerId, feed: Feed, subscription: SubscriptionHandle) {
        match self.slots.entry((consumer.clone(), feed)) {
            Entry::Occupied(mut slot) => {
                slot.get().unsubscribe();
                tracing::debug!(
                    target: "lostfound::subscriptions",
                    "Consumer {} retargeted {:?} from {} to {}",
                    consumer,
                    feed,
                    slot.get().target(),
                    subscription.target()
                );
                slot.insert(subscription);
            }
            Entry::Vacant(slot) => {
                slot.insert(subscription);
            }
        }
    }

    /// Releases one slot. Returns `false` if it was already empty.
    pub fn release(&self, consumer: &ConsumerId, feed: Feed) -> bool {
        match self.slots.remove(&(consumer.clone(), feed)) {
            Some((_, handle)) => {
                handle.unsubscribe();
                true
            }
            None => false,
        }
    }

    /// Releases every slot owned by `consumer`. Called on teardown.
    pub fn release_all(&self, consumer: &ConsumerId) -> usize {
        let mut released = 0;
        self.slots.retain(|(owner, _), handle| {
            if owner == consumer {
                handle.unsubscribe();
                released += 1;
                false
            } else {
                true
            }
        });
        if released > 0 {
            tracing::debug!(
                target: "lostfound::subscriptions",
                "Released {} subscriptions for consumer {}",
                released,
                consumer
            );
        }
        released
    }

    pub fn state(&self, consumer: &ConsumerId, feed: Feed) -> SlotState {
        match self.slots.get(&(consumer.clone(), feed)) {
            Some(handle) if handle.is_active() => SlotState::Subscribed,
            _ => SlotState::Unsubscribed,
        }
    }

    /// Target collection of the slot's current subscription, if any.
    pub fn target(&self, consumer: &ConsumerId, feed: Feed) -> Option<String> {
        self.slots
            .get(&(consumer.clone(), feed))
            .map(|handle| handle.target().to_string())
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_active()).count()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
