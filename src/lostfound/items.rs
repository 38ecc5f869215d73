use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::lostfound::{
    LostFound,
    document_store::{Document, DocumentPath, DocumentStore, Fields, OrderBy, StoreError},
    error::{LostFoundError, Result},
    location::Coordinates,
    subscriptions::{ConsumerId, Feed, spawn_listener},
};

const ITEMS_COLLECTION: &str = "items";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Lost,
    Found,
    Returned,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Lost => write!(f, "lost"),
            ItemStatus::Found => write!(f, "found"),
            ItemStatus::Returned => write!(f, "returned"),
        }
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lost" => Ok(ItemStatus::Lost),
            "found" => Ok(ItemStatus::Found),
            "returned" => Ok(ItemStatus::Returned),
            _ => Err(format!("Invalid item status: {}", s)),
        }
    }
}

/// A reported item listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub owner_id: String,
    pub owner_name: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
    pub status: ItemStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

/// Input for [`LostFound::create_item`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub title: String,
    pub description: String,
    pub photo_url: Option<String>,
    pub location: Option<Coordinates>,
    pub place_name: Option<String>,
    pub status: ItemStatus,
}

impl NewItem {
    pub fn new(title: impl Into<String>, status: ItemStatus) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            photo_url: None,
            location: None,
            place_name: None,
            status,
        }
    }
}

/// Client-side listing filter. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFilter {
    /// Case-insensitive substring of title, description or place name.
    pub query: Option<String>,
    pub status: Option<ItemStatus>,
    /// Only items with a location within the radius, in kilometres.
    pub near: Option<(Coordinates, f64)>,
}

impl ItemFilter {
    pub fn matches(&self, item: &Item) -> bool {
        if let Some(status) = self.status {
            if item.status != status {
                return false;
            }
        }

        if let Some(query) = self.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let needle = query.to_lowercase();
            let hit = item.title.to_lowercase().contains(&needle)
                || item.description.to_lowercase().contains(&needle)
                || item
                    .place_name
                    .as_deref()
                    .is_some_and(|place| place.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }

        if let Some((center, radius_km)) = &self.near {
            match &item.location {
                Some(location) if center.distance_km(location) <= *radius_km => {}
                _ => return false,
            }
        }

        true
    }

    /// Keeps matching items, newest first.
    pub fn apply(&self, items: Vec<Item>) -> Vec<Item> {
        let mut matching: Vec<Item> = items.into_iter().filter(|item| self.matches(item)).collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        matching
    }
}

fn item_path(item_id: &str) -> DocumentPath {
    DocumentPath::new(ITEMS_COLLECTION, item_id)
}

fn decode_items(documents: Vec<Document>) -> std::result::Result<Vec<Item>, StoreError> {
    Ok(documents
        .iter()
        .filter_map(|doc| match doc.decode::<Item>() {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(
                    target: "lostfound::items",
                    "Skipping malformed item: {}",
                    e
                );
                None
            }
        })
        .collect())
}

impl LostFound {
    /// Publishes a new listing owned by the signed-in user.
    pub async fn create_item(&self, new_item: NewItem) -> Result<Item> {
        if new_item.title.trim().is_empty() {
            return Err(LostFoundError::InvalidInput(
                "item title cannot be empty".to_string(),
            ));
        }
        let user = self.require_user()?;

        let item = Item {
            id: Uuid::new_v4().to_string(),
            owner_id: user.id,
            owner_name: user.display_name,
            title: new_item.title.trim().to_string(),
            description: new_item.description,
            photo_url: new_item.photo_url,
            location: new_item.location,
            place_name: new_item.place_name,
            status: new_item.status,
            // Stored with millisecond precision
            created_at: Utc::now().trunc_subsecs(3),
        };

        self.store
            .set(&item_path(&item.id), serde_json::to_value(&item)?)
            .await?;

        tracing::info!(
            target: "lostfound::items",
            "Created {} item {}",
            item.status,
            item.id
        );
        Ok(item)
    }

    pub async fn get_item(&self, item_id: &str) -> Result<Option<Item>> {
        match self.store.get(&item_path(item_id)).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    pub async fn fetch_items(&self, filter: &ItemFilter) -> Result<Vec<Item>> {
        let documents = self
            .store
            .query(ITEMS_COLLECTION, Some(&OrderBy::descending("created_at")))
            .await?;
        Ok(filter.apply(decode_items(documents)?))
    }

    pub async fn update_item_status(&self, item_id: &str, status: ItemStatus) -> Result<Item> {
        self.require_user()?;
        let path = item_path(item_id);
        if self.store.get(&path).await?.is_none() {
            return Err(LostFoundError::ItemNotFound(item_id.to_string()));
        }

        let mut fields = Fields::new();
        fields.insert("status".to_string(), json!(status));
        self.store.merge(&path, fields).await?;

        self.get_item(item_id)
            .await?
            .ok_or_else(|| LostFoundError::ItemNotFound(item_id.to_string()))
    }

    /// Points `consumer`'s item feed at the listings matching `filter`.
    pub fn observe_items<F>(&self, consumer: &ConsumerId, filter: ItemFilter, on_update: F)
    where
        F: Fn(Vec<Item>) + Send + Sync + 'static,
    {
        let handle = spawn_listener(
            self.store.clone(),
            ITEMS_COLLECTION.to_string(),
            None,
            move |documents| Ok(filter.apply(decode_items(documents)?)),
            on_update,
        );
        self.subscriptions.replace(consumer, Feed::Items, handle);
    }
}
