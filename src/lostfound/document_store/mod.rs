//! Document store boundary.
//!
//! The remote document store is the single source of truth for messages,
//! partner directories and item listings. This module defines the contract the
//! rest of the crate codes against, plus two implementations:
//!
//! - [`MemoryDocumentStore`]: in-process, used by tests and offline demos
//! - [`SqliteDocumentStore`]: JSON documents persisted through `sqlx`
//!
//! Documents live in hierarchical collections (`chats/{id}/messages`). Reads
//! are full snapshots; live reads are built on [`DocumentStore::watch`], which
//! only says *that* a collection changed, never *what* changed.

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::lostfound::database::DatabaseError;

mod change_feed;
pub mod memory;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

pub use change_feed::ChangeFeed;
pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

pub type Fields = serde_json::Map<String, Value>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid document at {path}: {reason}")]
    InvalidDocument { path: String, reason: String },

    #[error("Field {field} of {path} is not an integer")]
    InvalidField { path: String, field: String },

    #[error("Document store unavailable: {0}")]
    Unavailable(String),
}

/// Location of a single document: its parent collection plus its id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    collection: String,
    id: String,
}

impl DocumentPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub data: Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone()).map_err(|e| StoreError::InvalidDocument {
            path: self.path.to_string(),
            reason: e.to_string(),
        })
    }
}

/// A single mutation. Batches of writes are applied in order and atomically.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Replace the whole document.
    Set { path: DocumentPath, data: Value },
    /// Overwrite the given top-level fields, keeping the others. Creates the document if missing.
    Merge { path: DocumentPath, fields: Fields },
    /// Add `delta` to an integer field. A missing document or field counts as 0.
    Increment {
        path: DocumentPath,
        field: String,
        delta: i64,
    },
}

impl Write {
    pub fn path(&self) -> &DocumentPath {
        match self {
            Write::Set { path, .. } | Write::Merge { path, .. } | Write::Increment { path, .. } => {
                path
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Descending,
        }
    }
}

/// Emitted on every committed write, one per touched document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotice {
    pub collection: String,
    pub document_id: String,
}

impl From<&DocumentPath> for ChangeNotice {
    fn from(path: &DocumentPath) -> Self {
        Self {
            collection: path.collection.clone(),
            document_id: path.id.clone(),
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads one document. A missing document is `Ok(None)`.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError>;

    /// Applies all writes or none of them.
    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError>;

    /// Reads every document of a collection. Ties on the order field are broken by document id.
    async fn query(
        &self,
        collection: &str,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Document>, StoreError>;

    /// Subscribes to change notices for a collection. Does not deliver a snapshot.
    fn watch(&self, collection: &str) -> broadcast::Receiver<ChangeNotice>;

    async fn set(&self, path: &DocumentPath, data: Value) -> Result<(), StoreError> {
        self.commit(vec![Write::Set {
            path: path.clone(),
            data,
        }])
        .await
    }

    async fn merge(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        self.commit(vec![Write::Merge {
            path: path.clone(),
            fields,
        }])
        .await
    }

    async fn increment(&self, path: &DocumentPath, field: &str, delta: i64) -> Result<(), StoreError> {
        self.commit(vec![Write::Increment {
            path: path.clone(),
            field: field.to_string(),
            delta,
        }])
        .await
    }
}

/// Computes the new contents of a document after `write`.
pub(crate) fn apply_write(current: Option<Value>, write: &Write) -> Result<Value, StoreError> {
    match write {
        Write::Set { data, .. } => Ok(data.clone()),
        Write::Merge { path, fields } => {
            let mut object = into_object(path, current)?;
            for (key, value) in fields {
                object.insert(key.clone(), value.clone());
            }
            Ok(Value::Object(object))
        }
        Write::Increment { path, field, delta } => {
            let mut object = into_object(path, current)?;
            let existing = match object.get(field) {
                None | Some(Value::Null) => 0,
                Some(value) => value.as_i64().ok_or_else(|| StoreError::InvalidField {
                    path: path.to_string(),
                    field: field.clone(),
                })?,
            };
            object.insert(field.clone(), Value::from(existing + delta));
            Ok(Value::Object(object))
        }
    }
}

fn into_object(path: &DocumentPath, current: Option<Value>) -> Result<Fields, StoreError> {
    match current {
        None => Ok(Fields::new()),
        Some(Value::Object(object)) => Ok(object),
        Some(_) => Err(StoreError::InvalidDocument {
            path: path.to_string(),
            reason: "not a JSON object".to_string(),
        }),
    }
}

/// Orders documents the way SQLite orders `json_extract` results:
/// missing/null first, then numbers, then strings.
pub(crate) fn sort_documents(documents: &mut [Document], order: Option<&OrderBy>) {
    documents.sort_by(|a, b| {
        let by_field = order
            .map(|order| compare_values(a.data.get(&order.field), b.data.get(&order.field)))
            .unwrap_or(Ordering::Equal);
        let ordering = by_field.then_with(|| a.path.id.cmp(&b.path.id));
        match order.map(|o| o.direction) {
            Some(Direction::Descending) => ordering.reverse(),
            _ => ordering,
        }
    });
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) | Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }

    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(id: &str) -> DocumentPath {
        DocumentPath::new("users/u1/partners", id)
    }

    fn doc(id: &str, data: Value) -> Document {
        Document {
            path: path(id),
            data,
        }
    }

    #[test]
    fn test_document_path_display() {
        assert_eq!(path("u2").to_string(), "users/u1/partners/u2");
        assert_eq!(path("u2").collection(), "users/u1/partners");
        assert_eq!(path("u2").id(), "u2");
    }

    #[test]
    fn test_merge_keeps_untouched_fields() {
        let current = json!({"name": "Bob", "unread_count": 3});
        let mut fields = Fields::new();
        fields.insert("name".to_string(), json!("Robert"));

        let merged = apply_write(
            Some(current),
            &Write::Merge {
                path: path("u2"),
                fields,
            },
        )
        .unwrap();

        assert_eq!(merged, json!({"name": "Robert", "unread_count": 3}));
    }

    #[test]
    fn test_increment_missing_document_starts_at_zero() {
        let write = Write::Increment {
            path: path("u2"),
            field: "unread_count".to_string(),
            delta: 1,
        };
        assert_eq!(apply_write(None, &write).unwrap(), json!({"unread_count": 1}));

        let again = apply_write(Some(json!({"unread_count": 1})), &write).unwrap();
        assert_eq!(again, json!({"unread_count": 2}));
    }

    #[test]
    fn test_increment_non_integer_field_fails() {
        let write = Write::Increment {
            path: path("u2"),
            field: "unread_count".to_string(),
            delta: 1,
        };
        let result = apply_write(Some(json!({"unread_count": "three"})), &write);
        assert!(matches!(result, Err(StoreError::InvalidField { .. })));
    }

    #[test]
    fn test_merge_into_non_object_fails() {
        let write = Write::Merge {
            path: path("u2"),
            fields: Fields::new(),
        };
        let result = apply_write(Some(json!([1, 2, 3])), &write);
        assert!(matches!(result, Err(StoreError::InvalidDocument { .. })));
    }

    #[test]
    fn test_sort_documents_ascending_with_id_tiebreak() {
        let mut docs = vec![
            doc("c", json!({"sent_at": 20})),
            doc("b", json!({"sent_at": 10})),
            doc("a", json!({"sent_at": 20})),
            doc("z", json!({})),
        ];

        sort_documents(&mut docs, Some(&OrderBy::ascending("sent_at")));

        let ids: Vec<&str> = docs.iter().map(|d| d.path.id()).collect();
        assert_eq!(ids, vec!["z", "b", "a", "c"]);
    }

    #[test]
    fn test_sort_documents_descending() {
        let mut docs = vec![
            doc("a", json!({"created_at": 1})),
            doc("b", json!({"created_at": 3})),
            doc("c", json!({"created_at": 2})),
        ];

        sort_documents(&mut docs, Some(&OrderBy::descending("created_at")));

        let ids: Vec<&str> = docs.iter().map(|d| d.path.id()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_decode_reports_path() {
        #[derive(Debug, serde::Deserialize)]
        struct Named {
            #[allow(dead_code)]
            name: String,
        }

        let err = doc("u9", json!({"other": 1})).decode::<Named>().unwrap_err();
        assert!(err.to_string().contains("users/u1/partners/u9"));
    }
}
