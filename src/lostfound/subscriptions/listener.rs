//! Turns change notices into full-snapshot callbacks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::SubscriptionHandle;
use crate::lostfound::document_store::{Document, DocumentStore, OrderBy, StoreError};

/// Spawns a task that delivers the current snapshot of `collection` now and
/// after every change, until the returned handle is released.
///
/// Each delivery is a full replacement of the previous one. A failed re-read
/// is logged and skipped; the next change triggers a fresh attempt.
pub(crate) fn spawn_listener<T, D, C>(
    store: Arc<dyn DocumentStore>,
    collection: String,
    order: Option<OrderBy>,
    decode: D,
    on_update: C,
) -> SubscriptionHandle
where
    T: Send + 'static,
    D: Fn(Vec<Document>) -> Result<T, StoreError> + Send + 'static,
    C: Fn(T) + Send + Sync + 'static,
{
    // Watch before the first read so no change can slip in between
    let mut changes = store.watch(&collection);
    let active = Arc::new(AtomicBool::new(true));

    let task = tokio::spawn({
        let active = active.clone();
        let collection = collection.clone();
        async move {
            loop {
                match store.query(&collection, order.as_ref()).await.and_then(&decode) {
                    Ok(snapshot) => {
                        if !active.load(Ordering::Acquire) {
                            break;
                        }
                        on_update(snapshot);
                    }
                    Err(e) => {
                        tracing::warn!(
                            target: "lostfound::subscriptions",
                            "Skipping update for {}: {}",
                            collection,
                            e
                        );
                    }
                }

                match changes.recv().await {
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(
                            target: "lostfound::subscriptions",
                            "Listener on {} lagged by {} notices",
                            collection,
                            skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                }

                // Coalesce a burst of notices into one re-read
                loop {
                    match changes.try_recv() {
                        Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
            }
        }
    });

    tracing::debug!(
        target: "lostfound::subscriptions",
        "Listening on {}",
        collection
    );

    SubscriptionHandle::new(collection, active, task.abort_handle())
}
