//! Failure-injecting store shared by unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{
    ChangeNotice, Document, DocumentPath, DocumentStore, MemoryDocumentStore, OrderBy, StoreError,
    Write,
};

#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: MemoryDocumentStore,
    fail_commits: AtomicBool,
    fail_queries: AtomicBool,
    commit_calls: AtomicUsize,
    committed: Mutex<Vec<Write>>,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Number of commit attempts, including failed ones.
    pub(crate) fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    /// Writes from successful commits, in order.
    pub(crate) fn committed_writes(&self) -> Vec<Write> {
        self.committed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        self.inner.get(path).await
    }

    async fn commit(&self, writes: Vec<Write>) -> Result<(), StoreError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        self.inner.commit(writes.clone()).await?;
        self.committed.lock().unwrap().extend(writes);
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Document>, StoreError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".to_string()));
        }
        self.inner.query(collection, order).await
    }

    fn watch(&self, collection: &str) -> broadcast::Receiver<ChangeNotice> {
        self.inner.watch(collection)
    }
}
