use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{
    ChangeFeed, ChangeNotice, Document, DocumentPath, DocumentStore, OrderBy, StoreError, Write,
};
use crate::lostfound::database::Database;

/// Document store persisted in the local SQLite database.
///
/// Change notices only cover writes made through this instance.
#[derive(Debug)]
pub struct SqliteDocumentStore {
    database: Arc<Database>,
    changes: ChangeFeed,
}

impl SqliteDocumentStore {
    pub fn new(database: Arc<Database>) -> Self {
        Self {
            database,
            changes: ChangeFeed::new(),
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        Ok(self.database.find_document(path).await?)
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        let notices = self.database.commit_writes(&writes).await?;
        tracing::debug!(
            target: "lostfound::document_store",
            "Committed {} writes touching {} documents",
            writes.len(),
            notices.len()
        );
        self.changes.emit_all(notices);
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Document>, StoreError> {
        Ok(self.database.find_documents(collection, order).await?)
    }

    fn watch(&self, collection: &str) -> broadcast::Receiver<ChangeNotice> {
        self.changes.subscribe(collection)
    }
}
