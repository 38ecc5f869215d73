use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::lostfound::{
    LostFound,
    document_store::{Document, DocumentPath, DocumentStore, Fields, StoreError, Write},
    error::{LostFoundError, Result},
    subscriptions::{ConsumerId, Feed, SubscriptionHandle, spawn_listener},
};

const UNREAD_COUNT_FIELD: &str = "unread_count";

/// One user's view of a chat partner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerEntry {
    pub other_user_id: String,
    pub other_user_name: String,
    pub last_message: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_message_at: DateTime<Utc>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl PartnerEntry {
    pub fn has_unread(&self) -> bool {
        self.unread_count > 0
    }
}

/// Newest activity first. Ties are broken by the partner's id.
pub fn sort_by_recent(entries: &mut [PartnerEntry]) {
    entries.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then_with(|| a.other_user_id.cmp(&b.other_user_id))
    });
}

fn partners_collection(owner_id: &str) -> String {
    format!("users/{owner_id}/partners")
}

fn entry_path(owner_id: &str, other_id: &str) -> DocumentPath {
    DocumentPath::new(partners_collection(owner_id), other_id)
}

fn preview_fields(other_id: &str, other_name: &str, body: &str, at: DateTime<Utc>) -> Fields {
    let mut fields = Fields::new();
    fields.insert("other_user_id".to_string(), json!(other_id));
    fields.insert("other_user_name".to_string(), json!(other_name));
    fields.insert("last_message".to_string(), json!(body));
    fields.insert("last_message_at".to_string(), json!(at.timestamp_millis()));
    fields
}

fn decode_entries(documents: Vec<Document>) -> std::result::Result<Vec<PartnerEntry>, StoreError> {
    Ok(documents
        .iter()
        .filter_map(|doc| match doc.decode::<PartnerEntry>() {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(
                    target: "lostfound::partners",
                    "Skipping malformed partner entry: {}",
                    e
                );
                None
            }
        })
        .collect())
}

/// Per-user index of chat partners, maintained as a side effect of sending.
#[derive(Clone)]
pub struct PartnerDirectory {
    store: Arc<dyn DocumentStore>,
}

impl PartnerDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Updates both participants' entries for a message sent now.
    pub async fn record_exchange(
        &self,
        sender_id: &str,
        sender_name: &str,
        receiver_id: &str,
        receiver_name: &str,
        body: &str,
    ) -> Result<()> {
        self.record_exchange_at(
            sender_id,
            sender_name,
            receiver_id,
            receiver_name,
            body,
            Utc::now().trunc_subsecs(3),
        )
        .await
    }

    /// Updates both participants' entries for a message sent at `sent_at`, in one batch.
    ///
    /// The sender's entry keeps its unread count; the receiver's is bumped by one.
    /// If the batch fails neither entry changes. A user cannot be their own partner.
    pub async fn record_exchange_at(
        &self,
        sender_id: &str,
        sender_name: &str,
        receiver_id: &str,
        receiver_name: &str,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        if sender_id == receiver_id {
            return Err(LostFoundError::InvalidInput(
                "cannot record an exchange with oneself".to_string(),
            ));
        }
        let receiver_entry = entry_path(receiver_id, sender_id);

        let writes = vec![
            Write::Merge {
                path: entry_path(sender_id, receiver_id),
                fields: preview_fields(receiver_id, receiver_name, body, sent_at),
            },
            Write::Merge {
                path: receiver_entry.clone(),
                fields: preview_fields(sender_id, sender_name, body, sent_at),
            },
            Write::Increment {
                path: receiver_entry,
                field: UNREAD_COUNT_FIELD.to_string(),
                delta: 1,
            },
        ];

        self.store.commit(writes).await?;

        tracing::debug!(
            target: "lostfound::partners",
            "Recorded exchange {} -> {}",
            sender_id,
            receiver_id
        );
        Ok(())
    }

    /// Live view of `owner_id`'s partners. Delivered unordered; see [`sort_by_recent`].
    pub fn subscribe<F>(&self, owner_id: &str, on_update: F) -> SubscriptionHandle
    where
        F: Fn(Vec<PartnerEntry>) + Send + Sync + 'static,
    {
        spawn_listener(
            self.store.clone(),
            partners_collection(owner_id),
            None,
            decode_entries,
            on_update,
        )
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.unsubscribe();
    }

    pub async fn fetch_once(&self, owner_id: &str) -> Result<Vec<PartnerEntry>> {
        let documents = self
            .store
            .query(&partners_collection(owner_id), None)
            .await?;
        Ok(decode_entries(documents)?)
    }

    pub async fn entry(&self, owner_id: &str, other_id: &str) -> Result<Option<PartnerEntry>> {
        match self.store.get(&entry_path(owner_id, other_id)).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Clears the unread count on `owner_id`'s entry for `other_id`.
    ///
    /// Returns `false` when there is no such entry; none is created.
    pub async fn mark_viewed(&self, owner_id: &str, other_id: &str) -> Result<bool> {
        let path = entry_path(owner_id, other_id);
        if self.store.get(&path).await?.is_none() {
            return Ok(false);
        }

        let mut fields = Fields::new();
        fields.insert(UNREAD_COUNT_FIELD.to_string(), json!(0));
        fields.insert(
            "last_seen_at".to_string(),
            json!(Utc::now().timestamp_millis()),
        );
        self.store.merge(&path, fields).await?;
        Ok(true)
    }

    /// Sum of unread counts across all of `owner_id`'s partners.
    pub async fn total_unread(&self, owner_id: &str) -> Result<u32> {
        Ok(self
            .fetch_once(owner_id)
            .await?
            .iter()
            .map(|entry| entry.unread_count)
            .sum())
    }
}

impl LostFound {
    /// The signed-in user's partners, newest activity first.
    pub async fn fetch_partners(&self) -> Result<Vec<PartnerEntry>> {
        let user = self.require_user()?;
        let mut entries = self.partners.fetch_once(&user.id).await?;
        sort_by_recent(&mut entries);
        Ok(entries)
    }

    /// Points `consumer`'s partner feed at the signed-in user's directory.
    /// Entries are delivered newest activity first.
    pub fn observe_partners<F>(&self, consumer: &ConsumerId, on_update: F) -> Result<()>
    where
        F: Fn(Vec<PartnerEntry>) + Send + Sync + 'static,
    {
        let user = self.require_user()?;
        let handle = self.partners.subscribe(&user.id, move |mut entries| {
            sort_by_recent(&mut entries);
            on_update(entries);
        });
        self.subscriptions.replace(consumer, Feed::Partners, handle);
        Ok(())
    }

    pub async fn mark_conversation_viewed(&self, other_user_id: &str) -> Result<bool> {
        let user = self.require_user()?;
        self.partners.mark_viewed(&user.id, other_user_id).await
    }

    pub async fn unread_total(&self) -> Result<u32> {
        let user = self.require_user()?;
        self.partners.total_unread(&user.id).await
    }

    /// Partner entry for `other_user_id`, or an error if none exists yet.
    pub async fn partner(&self, other_user_id: &str) -> Result<PartnerEntry> {
        let user = self.require_user()?;
        self.partners
            .entry(&user.id, other_user_id)
            .await?
            .ok_or_else(|| {
                LostFoundError::InvalidInput(format!("no conversation with {other_user_id}"))
            })
    }
}
