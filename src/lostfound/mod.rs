use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

pub mod app_settings;
pub mod conversation;
pub mod database;
pub mod document_store;
pub mod error;
pub mod identity;
pub mod items;
pub mod location;
pub mod messages;
pub mod partners;
pub mod subscriptions;

use crate::init_tracing;

use app_settings::AppSettings;
use database::Database;
use document_store::{DocumentStore, MemoryDocumentStore, SqliteDocumentStore};
use error::{LostFoundError, Result};
use identity::{CurrentUser, IdentityProvider};
use location::LocationProvider;
use messages::MessageStore;
use partners::PartnerDirectory;
use subscriptions::{ConsumerId, Feed, SlotState, SubscriptionManager};

/// Which [`DocumentStore`] backs messages, partners and items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process only; contents are lost on exit.
    Memory,
    /// JSON documents in the local SQLite database.
    #[default]
    Sqlite,
}

#[derive(Clone, Debug)]
pub struct LostFoundConfig {
    /// Directory for application data
    pub data_dir: PathBuf,

    /// Directory for application logs
    pub logs_dir: PathBuf,

    pub store_backend: StoreBackend,
}

impl LostFoundConfig {
    pub fn new(data_dir: &Path, logs_dir: &Path) -> Self {
        let env_suffix = if cfg!(debug_assertions) {
            "dev"
        } else {
            "release"
        };

        Self {
            data_dir: data_dir.join(env_suffix),
            logs_dir: logs_dir.join(env_suffix),
            store_backend: StoreBackend::default(),
        }
    }

    pub fn with_store_backend(mut self, store_backend: StoreBackend) -> Self {
        self.store_backend = store_backend;
        self
    }
}

/// Entry point of the lost-and-found core. All collaborators are passed in
/// explicitly; nothing is stored in process-wide state apart from logging.
pub struct LostFound {
    pub config: LostFoundConfig,
    database: Arc<Database>,
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    location: Option<Arc<dyn LocationProvider>>,
    messages: MessageStore,
    partners: PartnerDirectory,
    subscriptions: SubscriptionManager,
}

impl std::fmt::Debug for LostFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LostFound")
            .field("config", &self.config)
            .field("database", &"<REDACTED>")
            .field("store", &"<REDACTED>")
            .field("identity", &"<REDACTED>")
            .field("location", &self.location.is_some())
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

impl LostFound {
    /// Sets up directories, logging, the local database and the document store.
    ///
    /// # Errors
    ///
    /// Fails if the data or log directories cannot be created, or the database
    /// cannot be opened or migrated.
    pub async fn initialize(
        config: LostFoundConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        let data_dir = &config.data_dir;
        let logs_dir = &config.logs_dir;

        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))
            .map_err(LostFoundError::from)?;
        std::fs::create_dir_all(logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))
            .map_err(LostFoundError::from)?;

        init_tracing(logs_dir);

        tracing::debug!(
            target: "lostfound::initialize",
            "Logging initialized in directory: {:?}",
            logs_dir
        );

        let database = Arc::new(Database::new(data_dir.join("lostfound.sqlite")).await?);

        AppSettings::find_or_create_default(&database).await?;

        let store: Arc<dyn DocumentStore> = match config.store_backend {
            StoreBackend::Memory => Arc::new(MemoryDocumentStore::new()),
            StoreBackend::Sqlite => Arc::new(SqliteDocumentStore::new(database.clone())),
        };

        tracing::info!(
            target: "lostfound::initialize",
            "LostFound initialized with {:?} document store",
            config.store_backend
        );

        Ok(Self::from_parts(config, database, store, identity))
    }

    fn from_parts(
        config: LostFoundConfig,
        database: Arc<Database>,
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config,
            messages: MessageStore::new(store.clone()),
            partners: PartnerDirectory::new(store.clone()),
            database,
            store,
            identity,
            location: None,
            subscriptions: SubscriptionManager::new(),
        }
    }

    pub fn with_location_provider(mut self, provider: Arc<dyn LocationProvider>) -> Self {
        self.location = Some(provider);
        self
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.identity.current_user()
    }

    fn require_user(&self) -> Result<CurrentUser> {
        self.identity
            .current_user()
            .ok_or(LostFoundError::NotAuthenticated)
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn partners(&self) -> &PartnerDirectory {
        &self.partners
    }

    pub fn subscription_state(&self, consumer: &ConsumerId, feed: Feed) -> SlotState {
        self.subscriptions.state(consumer, feed)
    }

    /// Stops one feed of `consumer`, e.g. when a chat screen is closed.
    pub fn release_feed(&self, consumer: &ConsumerId, feed: Feed) -> bool {
        self.subscriptions.release(consumer, feed)
    }

    /// Stops every feed of `consumer`. Call when the consumer is torn down.
    pub fn release_consumer(&self, consumer: &ConsumerId) -> usize {
        self.subscriptions.release_all(consumer)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::lostfound::identity::StaticIdentity;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    pub(crate) fn create_test_config() -> (LostFoundConfig, TempDir, TempDir) {
        let data_temp_dir = TempDir::new().expect("Failed to create temp data dir");
        let logs_temp_dir = TempDir::new().expect("Failed to create temp logs dir");
        let config = LostFoundConfig::new(data_temp_dir.path(), logs_temp_dir.path())
            .with_store_backend(StoreBackend::Memory);
        (config, data_temp_dir, logs_temp_dir)
    }

    /// Instance backed by `store`, with `identity` as the current user source.
    pub(crate) async fn create_test_lostfound_with(
        store: Arc<dyn DocumentStore>,
        identity: Arc<StaticIdentity>,
    ) -> (LostFound, TempDir, TempDir) {
        let (config, data_temp, logs_temp) = create_test_config();

        std::fs::create_dir_all(&config.data_dir).unwrap();
        std::fs::create_dir_all(&config.logs_dir).unwrap();

        init_tracing(&config.logs_dir);

        let database = Arc::new(
            Database::new(config.data_dir.join("test.sqlite"))
                .await
                .unwrap(),
        );
        AppSettings::find_or_create_default(&database).await.unwrap();

        let lostfound = LostFound::from_parts(config, database, store, identity);
        (lostfound, data_temp, logs_temp)
    }

    pub(crate) async fn create_test_lostfound_with_store(
        store: Arc<dyn DocumentStore>,
    ) -> (LostFound, TempDir, TempDir) {
        create_test_lostfound_with(store, Arc::new(StaticIdentity::signed_in("U1", "Alice"))).await
    }

    /// SQLite-backed document store in its own temporary directory.
    pub(crate) async fn create_sqlite_store() -> (Arc<SqliteDocumentStore>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let database = Database::new(temp_dir.path().join("documents.sqlite"))
            .await
            .expect("Failed to create document database");
        (Arc::new(SqliteDocumentStore::new(Arc::new(database))), temp_dir)
    }

    /// In-memory instance signed in as `U1` ("Alice").
    pub(crate) async fn create_test_lostfound() -> (LostFound, TempDir, TempDir) {
        create_test_lostfound_with_store(Arc::new(MemoryDocumentStore::new())).await
    }

    /// Waits for the next pushed snapshot.
    pub(crate) async fn next_update<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("update within timeout")
            .expect("channel open")
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use crate::lostfound::identity::StaticIdentity;
    use crate::lostfound::items::{ItemFilter, ItemStatus, NewItem};
    use crate::lostfound::messages::MessageKey;
    use crate::lostfound::conversation::ConversationId;
    use tokio::sync::mpsc;

    mod config_tests {
        use super::*;

        #[test]
        fn test_lostfound_config_new() {
            let data_dir = std::path::Path::new("/test/data");
            let logs_dir = std::path::Path::new("/test/logs");
            let config = LostFoundConfig::new(data_dir, logs_dir);

            if cfg!(debug_assertions) {
                assert_eq!(config.data_dir, data_dir.join("dev"));
                assert_eq!(config.logs_dir, logs_dir.join("dev"));
            } else {
                assert_eq!(config.data_dir, data_dir.join("release"));
                assert_eq!(config.logs_dir, logs_dir.join("release"));
            }
            assert_eq!(config.store_backend, StoreBackend::Sqlite);
        }

        #[test]
        fn test_lostfound_config_store_backend() {
            let (config, _data_temp, _logs_temp) = create_test_config();
            assert_eq!(config.store_backend, StoreBackend::Memory);

            let config = config.with_store_backend(StoreBackend::Sqlite);
            assert_eq!(config.store_backend, StoreBackend::Sqlite);
        }
    }

    mod initialization_tests {
        use super::*;

        #[tokio::test]
        async fn test_initialize_with_sqlite_store() {
            let (config, _data_temp, _logs_temp) = create_test_config();
            let config = config.with_store_backend(StoreBackend::Sqlite);
            let identity = Arc::new(StaticIdentity::signed_in("U1", "Alice"));

            let lostfound = LostFound::initialize(config, identity).await.unwrap();

            assert!(lostfound.config.data_dir.exists());
            assert!(lostfound.config.logs_dir.exists());
            assert!(lostfound.config.data_dir.join("lostfound.sqlite").exists());
            assert!(!lostfound.app_settings().await.unwrap().is_dark_mode());
        }

        #[tokio::test]
        async fn test_lostfound_debug_format() {
            let (lostfound, _data_temp, _logs_temp) = create_test_lostfound().await;

            let debug_str = format!("{:?}", lostfound);
            assert!(debug_str.contains("LostFound"));
            assert!(debug_str.contains("config"));
            assert!(debug_str.contains("<REDACTED>"));
        }

        #[tokio::test]
        async fn test_current_location_without_provider() {
            let (lostfound, _data_temp, _logs_temp) = create_test_lostfound().await;
            let result = lostfound.current_location().await;
            assert!(matches!(result, Err(LostFoundError::LocationProviderMissing)));
        }
    }

    mod scenario_tests {
        use super::*;

        /// Alice messages Bob for the first time; both sides see the result.
        async fn alice_to_bob(store: Arc<dyn DocumentStore>) {
            let identity = Arc::new(StaticIdentity::signed_in("U1", "Alice"));
            let (lostfound, _data_temp, _logs_temp) =
                create_test_lostfound_with(store, identity.clone()).await;

            let sent = lostfound
                .send_private_message("U2", "Bob", "Hello")
                .await
                .unwrap();

            let key = MessageKey::Conversation(ConversationId::between("U1", "U2"));
            assert_eq!(key.collection(), "chats/U1_U2/messages");
            let log = lostfound.messages().fetch_once(&key).await.unwrap();
            assert_eq!(log, vec![sent]);

            let alice_entry = lostfound.partners().entry("U1", "U2").await.unwrap().unwrap();
            assert_eq!(alice_entry.other_user_name, "Bob");
            assert_eq!(alice_entry.last_message, "Hello");
            assert_eq!(alice_entry.unread_count, 0);

            let bob_entry = lostfound.partners().entry("U2", "U1").await.unwrap().unwrap();
            assert_eq!(bob_entry.other_user_name, "Alice");
            assert_eq!(bob_entry.last_message, "Hello");
            assert_eq!(bob_entry.unread_count, 1);

            // Bob opens the chat and sees the same log from his side
            identity.sign_in("U2", "Bob");
            let bob_view = lostfound.fetch_conversation("U1").await.unwrap();
            assert_eq!(bob_view.len(), 1);
            assert_eq!(bob_view[0].body, "Hello");
            assert!(lostfound.mark_conversation_viewed("U1").await.unwrap());
            assert_eq!(lostfound.unread_total().await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_alice_to_bob_in_memory() {
            alice_to_bob(Arc::new(MemoryDocumentStore::new())).await;
        }

        #[tokio::test]
        async fn test_alice_to_bob_sqlite() {
            let (store, _store_temp) = create_sqlite_store().await;
            alice_to_bob(store).await;
        }

        #[tokio::test]
        async fn test_observe_conversation_sqlite() {
            let (store, _store_temp) = create_sqlite_store().await;
            let (lostfound, _data_temp, _logs_temp) = create_test_lostfound_with_store(store).await;
            let consumer = ConsumerId::new("chat-screen");

            let (tx, mut rx) = mpsc::unbounded_channel();
            lostfound
                .observe_conversation(&consumer, "U2", move |messages| {
                    let _ = tx.send(messages);
                })
                .unwrap();
            assert!(next_update(&mut rx).await.is_empty());

            let sent = lostfound
                .send_private_message("U2", "Bob", "Hello")
                .await
                .unwrap();

            let snapshot = next_update(&mut rx).await;
            assert_eq!(snapshot, vec![sent]);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_concurrent_sends_sqlite() {
            let (store, _store_temp) = create_sqlite_store().await;
            let (lostfound, _data_temp, _logs_temp) = create_test_lostfound_with_store(store).await;
            let lostfound = Arc::new(lostfound);

            let sends: Vec<_> = (0..20)
                .map(|n| {
                    let lostfound = lostfound.clone();
                    tokio::spawn(async move {
                        lostfound
                            .send_private_message("U2", "Bob", &format!("message {n}"))
                            .await
                    })
                })
                .collect();
            for send in sends {
                send.await.unwrap().expect("concurrent send succeeds");
            }

            assert_eq!(lostfound.fetch_conversation("U2").await.unwrap().len(), 20);
            let bob = lostfound.partners().entry("U2", "U1").await.unwrap().unwrap();
            assert_eq!(bob.unread_count, 20);
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn test_concurrent_item_creation_sqlite() {
            let (store, _store_temp) = create_sqlite_store().await;
            let (lostfound, _data_temp, _logs_temp) = create_test_lostfound_with_store(store).await;

            let created = futures::future::try_join_all([
                lostfound.create_item(NewItem::new("Black umbrella", ItemStatus::Found)),
                lostfound.create_item(NewItem::new("House keys", ItemStatus::Lost)),
            ])
            .await
            .unwrap();

            assert_eq!(created.len(), 2);
            let listed = lostfound.fetch_items(&ItemFilter::default()).await.unwrap();
            assert_eq!(listed.len(), 2);
        }

        #[tokio::test]
        async fn test_release_consumer_stops_all_feeds() {
            let (lostfound, _data_temp, _logs_temp) = create_test_lostfound().await;
            let consumer = ConsumerId::new("home");

            let (tx, mut rx) = mpsc::unbounded_channel();
            lostfound
                .observe_partners(&consumer, move |entries| {
                    let _ = tx.send(entries.len());
                })
                .unwrap();
            lostfound.observe_item_thread(&consumer, "i1", |_| {});
            assert_eq!(next_update(&mut rx).await, 0);

            assert_eq!(
                lostfound.subscription_state(&consumer, Feed::Partners),
                SlotState::Subscribed
            );
            assert_eq!(lostfound.release_consumer(&consumer), 2);
            assert_eq!(
                lostfound.subscription_state(&consumer, Feed::Partners),
                SlotState::Unsubscribed
            );
            assert!(!lostfound.release_feed(&consumer, Feed::ItemThread));

            lostfound
                .send_private_message("U2", "Bob", "after teardown")
                .await
                .unwrap();
            assert!(rx.recv().await.is_none());
        }
    }
}
