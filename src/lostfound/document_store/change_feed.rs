//! Per-collection broadcast channels for change notices.
//!
//! Channels are created lazily on the first `subscribe` and removed the next
//! time a notice finds no live receivers.

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::ChangeNotice;

const BUFFER_SIZE: usize = 100;

#[derive(Debug)]
pub struct ChangeFeed {
    streams: DashMap<String, broadcast::Sender<ChangeNotice>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    pub fn subscribe(&self, collection: &str) -> broadcast::Receiver<ChangeNotice> {
        self.streams
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(BUFFER_SIZE).0)
            .subscribe()
    }

    pub fn emit(&self, notice: ChangeNotice) {
        let collection = notice.collection.clone();
        if let Some(sender) = self.streams.get(&collection) {
            if sender.send(notice).is_err() && sender.receiver_count() == 0 {
                drop(sender);
                self.streams
                    .remove_if(&collection, |_, sender| sender.receiver_count() == 0);
                tracing::debug!(
                    target: "lostfound::document_store",
                    "Removed idle change stream for {}",
                    collection
                );
            }
        }
    }

    pub fn emit_all(&self, notices: impl IntoIterator<Item = ChangeNotice>) {
        for notice in notices {
            self.emit(notice);
        }
    }

    #[cfg(test)]
    pub(crate) fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
