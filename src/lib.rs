use std::path::Path;
use std::sync::{Mutex, OnceLock};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt::Layer, prelude::*, registry::Registry};

mod lostfound;

pub use crate::lostfound::app_settings::{AppSettings, ThemeMode};
pub use crate::lostfound::conversation::ConversationId;
pub use crate::lostfound::document_store::{
    ChangeNotice, Direction, Document, DocumentPath, DocumentStore, Fields, MemoryDocumentStore,
    OrderBy, SqliteDocumentStore, StoreError, Write,
};
pub use crate::lostfound::error::{LostFoundError, Result};
pub use crate::lostfound::identity::{CurrentUser, IdentityProvider, StaticIdentity};
pub use crate::lostfound::items::{Item, ItemFilter, ItemStatus, NewItem};
pub use crate::lostfound::location::{
    Coordinates, LocationCallback, LocationError, LocationProvider, RequestId, current_location,
};
pub use crate::lostfound::messages::{Message, MessageContext, MessageKey, MessageStore};
pub use crate::lostfound::partners::{PartnerDirectory, PartnerEntry, sort_by_recent};
pub use crate::lostfound::subscriptions::{
    ConsumerId, Feed, SlotState, SubscriptionHandle, SubscriptionManager,
};
pub use crate::lostfound::{LostFound, LostFoundConfig, StoreBackend};

static TRACING_GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();

pub(crate) fn init_tracing(logs_dir: &Path) {
    TRACING_INIT.get_or_init(|| {
        let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
        let stdout_layer = Layer::new()
            .with_writer(non_blocking_stdout)
            .with_ansi(true)
            .with_target(true);

        let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("lostfound")
            .filename_suffix("log")
            .build(logs_dir);

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match file_appender {
            Ok(file_appender) => {
                let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
                TRACING_GUARDS
                    .set(Mutex::new(vec![file_guard, stdout_guard]))
                    .ok();

                let file_layer = Layer::new()
                    .with_writer(non_blocking_file)
                    .with_ansi(false)
                    .with_target(true);

                // Another subscriber may already be installed, e.g. by a host app
                let _ = Registry::default()
                    .with(filter)
                    .with(stdout_layer)
                    .with(file_layer)
                    .try_init();
            }
            Err(e) => {
                let _ = Registry::default()
                    .with(filter)
                    .with(stdout_layer)
                    .try_init();
                TRACING_GUARDS.set(Mutex::new(vec![stdout_guard])).ok();
                tracing::warn!(
                    target: "lostfound::init_tracing",
                    "File logging disabled, could not create appender in {:?}: {}",
                    logs_dir,
                    e
                );
            }
        }
    });
}
