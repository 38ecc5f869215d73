use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{
    ChangeFeed, ChangeNotice, Document, DocumentPath, DocumentStore, OrderBy, StoreError, Write,
    apply_write, sort_documents,
};

/// In-process document store.
///
/// Collections map to sorted id → JSON maps. Commits and reads share one
/// guard, so a batch is never observed half-applied.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: DashMap<String, BTreeMap<String, Value>>,
    batch_guard: Mutex<()>,
    changes: ChangeFeed,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.batch_guard
            .lock()
            .map_err(|_| StoreError::Unavailable("batch guard poisoned".to_string()))
    }

    /// Caller holds the batch guard.
    fn read(&self, path: &DocumentPath) -> Option<Value> {
        self.collections
            .get(path.collection())
            .and_then(|collection| collection.get(path.id()).cloned())
    }

    fn apply_batch(&self, writes: &[Write]) -> Result<Vec<ChangeNotice>, StoreError> {
        let _guard = self.lock()?;

        // Stage every write first so a failing write leaves the store untouched
        let mut staged: HashMap<DocumentPath, Value> = HashMap::new();
        let mut order: Vec<DocumentPath> = Vec::new();
        for write in writes {
            let path = write.path();
            let current = match staged.get(path) {
                Some(value) => Some(value.clone()),
                None => self.read(path),
            };
            let next = apply_write(current, write)?;
            if staged.insert(path.clone(), next).is_none() {
                order.push(path.clone());
            }
        }

        for path in &order {
            if let Some(value) = staged.remove(path) {
                self.collections
                    .entry(path.collection().to_string())
                    .or_default()
                    .insert(path.id().to_string(), value);
            }
        }

        Ok(order.iter().map(ChangeNotice::from).collect())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        let _guard = self.lock()?;
        Ok(self.read(path).map(|data| Document {
            path: path.clone(),
            data,
        }))
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        let notices = self.apply_batch(&writes)?;
        self.changes.emit_all(notices);
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut documents: Vec<Document> = {
            let _guard = self.lock()?;
            self.collections
                .get(collection)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|(id, data)| Document {
                            path: DocumentPath::new(collection, id.clone()),
                            data: data.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        sort_documents(&mut documents, order);
        Ok(documents)
    }

    fn watch(&self, collection: &str) -> broadcast::Receiver<ChangeNotice> {
        self.changes.subscribe(collection)
    }
}
