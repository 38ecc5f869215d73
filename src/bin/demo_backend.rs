use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::future::try_join_all;
use tokio::sync::mpsc;

use lostfound::{
    ConsumerId, ItemFilter, ItemStatus, LostFound, LostFoundConfig, LostFoundError, NewItem,
    StaticIdentity, StoreBackend,
};

/// Demo backend for the lost-and-found core
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Directory for application data
    #[clap(long, value_name = "PATH", required = true)]
    data_dir: PathBuf,

    /// Directory for application logs
    #[clap(long, value_name = "PATH", required = true)]
    logs_dir: PathBuf,

    /// Keep documents in memory instead of SQLite
    #[clap(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), LostFoundError> {
    let args = Args::parse();

    let backend = if args.in_memory {
        StoreBackend::Memory
    } else {
        StoreBackend::Sqlite
    };
    let config = LostFoundConfig::new(&args.data_dir, &args.logs_dir).with_store_backend(backend);
    let identity = Arc::new(StaticIdentity::signed_in("U1", "Alice"));

    let lostfound = match LostFound::initialize(config, identity.clone()).await {
        Ok(lostfound) => lostfound,
        Err(err) => {
            eprintln!("Failed to initialize LostFound: {}", err);
            std::process::exit(1);
        }
    };
    tracing::debug!("LostFound state after initialization: {:?}", lostfound);

    tracing::info!("=== Alice reports items ===");
    let items = try_join_all([
        lostfound.create_item(NewItem::new("Black umbrella", ItemStatus::Found)),
        lostfound.create_item(NewItem::new("House keys", ItemStatus::Lost)),
    ])
    .await?;
    for item in &items {
        tracing::info!("Created {} item '{}' ({})", item.status, item.title, item.id);
    }

    let found = lostfound
        .fetch_items(&ItemFilter {
            status: Some(ItemStatus::Found),
            ..Default::default()
        })
        .await?;
    tracing::info!("{} found item(s) listed", found.len());

    tracing::info!("=== Alice messages Bob ===");
    let chat_screen = ConsumerId::new("alice-chat");
    let (tx, mut rx) = mpsc::unbounded_channel();
    lostfound.observe_conversation(&chat_screen, "U2", move |messages| {
        let _ = tx.send(messages);
    })?;

    let sent = lostfound
        .send_private_message("U2", "Bob", "Hello, I think I found your keys")
        .await?;
    tracing::info!("Sent message {} at {}", sent.id, sent.sent_at);

    // Initial snapshot plus the one that includes the new message
    while let Ok(Some(snapshot)) = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await
    {
        tracing::info!("Alice's chat shows {} message(s)", snapshot.len());
        if snapshot.iter().any(|m| m.id == sent.id) {
            break;
        }
    }
    lostfound.release_consumer(&chat_screen);

    match lostfound.send_private_message("U2", "Bob", "   ").await {
        Err(LostFoundError::EmptyMessageBody) => tracing::info!("Blank message rejected"),
        other => tracing::warn!("Unexpected result for blank message: {:?}", other),
    }

    tracing::info!("=== Bob checks his inbox ===");
    identity.sign_in("U2", "Bob");
    for entry in lostfound.fetch_partners().await? {
        tracing::info!(
            "{}: \"{}\" ({} unread)",
            entry.other_user_name,
            entry.last_message,
            entry.unread_count
        );
    }

    let conversation = lostfound.fetch_conversation("U1").await?;
    tracing::info!("Bob sees {} message(s) from Alice", conversation.len());
    lostfound.mark_conversation_viewed("U1").await?;
    tracing::info!("Bob's unread total: {}", lostfound.unread_total().await?);

    lostfound
        .send_private_message("U1", "Alice", "Yes! Thank you")
        .await?;

    identity.sign_in("U1", "Alice");
    tracing::info!("Alice's unread total: {}", lostfound.unread_total().await?);

    tracing::info!("=== Demo complete ===");
    Ok(())
}
