use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lostfound::{
    LostFound,
    conversation::ConversationId,
    document_store::{Document, DocumentPath, DocumentStore, OrderBy, StoreError},
    error::{LostFoundError, Result},
    subscriptions::{ConsumerId, Feed, SubscriptionHandle, spawn_listener},
};

const SENT_AT_FIELD: &str = "sent_at";

/// Who a message is between: two users, or one user posting on an item's thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContext {
    Private {
        sender_id: String,
        receiver_id: String,
    },
    ItemThread {
        item_id: String,
        user_id: String,
    },
}

/// A chat message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Empty until appended; the store assigns a UUID when missing.
    #[serde(default)]
    pub id: String,

    #[serde(flatten)]
    pub context: MessageContext,

    #[serde(default)]
    pub sender_name: String,

    pub body: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn private(
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        receiver_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            context: MessageContext::Private {
                sender_id: sender_id.into(),
                receiver_id: receiver_id.into(),
            },
            sender_name: sender_name.into(),
            body: body.into(),
            sent_at: now_millis(),
        }
    }

    pub fn item_thread(
        item_id: impl Into<String>,
        user_id: impl Into<String>,
        sender_name: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            context: MessageContext::ItemThread {
                item_id: item_id.into(),
                user_id: user_id.into(),
            },
            sender_name: sender_name.into(),
            body: body.into(),
            sent_at: now_millis(),
        }
    }

    pub fn sender_id(&self) -> &str {
        match &self.context {
            MessageContext::Private { sender_id, .. } => sender_id,
            MessageContext::ItemThread { user_id, .. } => user_id,
        }
    }

    /// The log this message belongs to.
    pub fn key(&self) -> MessageKey {
        match &self.context {
            MessageContext::Private {
                sender_id,
                receiver_id,
            } => MessageKey::Conversation(ConversationId::between(sender_id, receiver_id)),
            MessageContext::ItemThread { item_id, .. } => MessageKey::ItemThread(item_id.clone()),
        }
    }
}

/// Current time at the precision messages are stored with.
fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Address of one append-only message log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Conversation(ConversationId),
    ItemThread(String),
}

impl MessageKey {
    pub fn collection(&self) -> String {
        match self {
            MessageKey::Conversation(id) => format!("chats/{id}/messages"),
            MessageKey::ItemThread(item_id) => format!("items/{item_id}/messages"),
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.collection())
    }
}

/// Orders by `sent_at`, then id, so two messages sent in the same millisecond
/// still have a stable order.
pub(crate) fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then_with(|| a.id.cmp(&b.id)));
}

fn decode_messages(documents: Vec<Document>) -> std::result::Result<Vec<Message>, StoreError> {
    let mut messages: Vec<Message> = documents
        .iter()
        .filter_map(|doc| match doc.decode::<Message>() {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(
                    target: "lostfound::messages",
                    "Skipping malformed message: {}",
                    e
                );
                None
            }
        })
        .collect();
    sort_messages(&mut messages);
    Ok(messages)
}

/// Append-only message logs with live reads, one log per [`MessageKey`].
#[derive(Clone)]
pub struct MessageStore {
    store: Arc<dyn DocumentStore>,
}

impl MessageStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Writes `message` under `key`, assigning an id if it has none.
    ///
    /// Performs no validation; callers reject blank bodies before getting here.
    /// Failures are returned as-is and never retried.
    pub async fn append(&self, key: &MessageKey, mut message: Message) -> Result<Message> {
        if message.id.is_empty() {
            message.id = Uuid::new_v4().to_string();
        }

        let path = DocumentPath::new(key.collection(), message.id.clone());
        self.store.set(&path, serde_json::to_value(&message)?).await?;

        tracing::debug!(
            target: "lostfound::messages",
            "Appended message {} to {}",
            message.id,
            key
        );
        Ok(message)
    }

    /// Live view of a log. `on_update` receives the full ordered sequence now
    /// and after every change.
    pub fn subscribe<F>(&self, key: &MessageKey, on_update: F) -> SubscriptionHandle
    where
        F: Fn(Vec<Message>) + Send + Sync + 'static,
    {
        spawn_listener(
            self.store.clone(),
            key.collection(),
            Some(OrderBy::ascending(SENT_AT_FIELD)),
            decode_messages,
            on_update,
        )
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.unsubscribe();
    }

    /// One-shot read. A log with no messages is `Ok` and empty; a failed read is `Err`.
    pub async fn fetch_once(&self, key: &MessageKey) -> Result<Vec<Message>> {
        let documents = self
            .store
            .query(&key.collection(), Some(&OrderBy::ascending(SENT_AT_FIELD)))
            .await?;
        Ok(decode_messages(documents)?)
    }

    /// Like [`MessageStore::fetch_once`], but logs failures and returns an empty list.
    pub async fn fetch_once_or_empty(&self, key: &MessageKey) -> Vec<Message> {
        self.fetch_once(key).await.unwrap_or_else(|e| {
            tracing::warn!(
                target: "lostfound::messages",
                "Failed to fetch messages for {}: {}",
                key,
                e
            );
            Vec::new()
        })
    }
}

impl LostFound {
    /// Sends a private message from the signed-in user to `receiver_id`.
    ///
    /// A blank body is rejected before anything is written. After the message
    /// is stored, both participants' partner directories are updated.
    pub async fn send_private_message(
        &self,
        receiver_id: &str,
        receiver_name: &str,
        body: &str,
    ) -> Result<Message> {
        if body.trim().is_empty() {
            return Err(LostFoundError::EmptyMessageBody);
        }
        let user = self.require_user()?;
        if receiver_id.is_empty() {
            return Err(LostFoundError::InvalidInput(
                "receiver id cannot be empty".to_string(),
            ));
        }
        if receiver_id == user.id {
            return Err(LostFoundError::InvalidInput(
                "cannot send a private message to yourself".to_string(),
            ));
        }

        let message = Message::private(&user.id, &user.display_name, receiver_id, body);
        let key = message.key();
        let message = self.messages.append(&key, message).await?;

        if let Err(e) = self
            .partners
            .record_exchange_at(
                &user.id,
                &user.display_name,
                receiver_id,
                receiver_name,
                body,
                message.sent_at,
            )
            .await
        {
            tracing::error!(
                target: "lostfound::messages",
                "Message {} stored but partner directories not updated: {}",
                message.id,
                e
            );
            return Err(e);
        }

        Ok(message)
    }

    /// Posts a message on an item's shared thread.
    pub async fn send_item_message(&self, item_id: &str, body: &str) -> Result<Message> {
        if body.trim().is_empty() {
            return Err(LostFoundError::EmptyMessageBody);
        }
        let user = self.require_user()?;

        let message = Message::item_thread(item_id, &user.id, &user.display_name, body);
        self.messages.append(&message.key(), message).await
    }

    /// Messages between the signed-in user and `other_user_id`, oldest first.
    pub async fn fetch_conversation(&self, other_user_id: &str) -> Result<Vec<Message>> {
        let user = self.require_user()?;
        let key = MessageKey::Conversation(ConversationId::between(&user.id, other_user_id));
        self.messages.fetch_once(&key).await
    }

    pub async fn fetch_item_thread(&self, item_id: &str) -> Result<Vec<Message>> {
        self.messages
            .fetch_once(&MessageKey::ItemThread(item_id.to_string()))
            .await
    }

    /// Points `consumer`'s conversation feed at the chat with `other_user_id`,
    /// releasing whichever conversation it observed before.
    pub fn observe_conversation<F>(
        &self,
        consumer: &ConsumerId,
        other_user_id: &str,
        on_update: F,
    ) -> Result<()>
    where
        F: Fn(Vec<Message>) + Send + Sync + 'static,
    {
        let user = self.require_user()?;
        let key = MessageKey::Conversation(ConversationId::between(&user.id, other_user_id));
        let handle = self.messages.subscribe(&key, on_update);
        self.subscriptions
            .replace(consumer, Feed::ConversationMessages, handle);
        Ok(())
    }

    pub fn observe_item_thread<F>(&self, consumer: &ConsumerId, item_id: &str, on_update: F)
    where
        F: Fn(Vec<Message>) + Send + Sync + 'static,
    {
        let key = MessageKey::ItemThread(item_id.to_string());
        let handle = self.messages.subscribe(&key, on_update);
        self.subscriptions.replace(consumer, Feed::ItemThread, handle);
    }
}
