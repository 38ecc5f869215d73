//! Types for live subscriptions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

/// Identifies one observer, typically a screen or view-model instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The logical feeds a consumer can observe. Each is one slot per consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feed {
    /// Messages of the private conversation currently open.
    ConversationMessages,

    /// Messages of the item thread currently open.
    ItemThread,

    /// The signed-in user's partner directory.
    Partners,

    /// All item listings.
    Items,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unsubscribed,
    Subscribed,
}

/// A live subscription. Released on [`SubscriptionHandle::unsubscribe`] or drop.
///
/// Once released no new callback starts. Releasing is idempotent.
#[derive(Debug)]
pub struct SubscriptionHandle {
    target: String,
    active: Arc<AtomicBool>,
    task: AbortHandle,
}

impl SubscriptionHandle {
    pub(crate) fn new(target: String, active: Arc<AtomicBool>, task: AbortHandle) -> Self {
        Self {
            target,
            active,
            task,
        }
    }

    /// The collection this subscription listens to.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.task.abort();
            tracing::debug!(
                target: "lostfound::subscriptions",
                "Released subscription on {}",
                self.target
            );
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_id_generate_is_unique() {
        assert_ne!(ConsumerId::generate(), ConsumerId::generate());
        assert_eq!(ConsumerId::new("chat-screen").as_str(), "chat-screen");
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let task = tokio::spawn(std::future::pending::<()>());
        let handle = SubscriptionHandle::new(
            "items".to_string(),
            Arc::new(AtomicBool::new(true)),
            task.abort_handle(),
        );

        assert!(handle.is_active());
        handle.unsubscribe();
        handle.unsubscribe();
        assert!(!handle.is_active());

        let joined = task.await;
        assert!(joined.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn drop_aborts_listener_task() {
        let task = tokio::spawn(std::future::pending::<()>());
        let active = Arc::new(AtomicBool::new(true));
        let handle =
            SubscriptionHandle::new("items".to_string(), active.clone(), task.abort_handle());

        drop(handle);

        assert!(!active.load(Ordering::Acquire));
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
