use thiserror::Error;

use crate::lostfound::database::DatabaseError;
use crate::lostfound::document_store::StoreError;
use crate::lostfound::location::LocationError;

pub type Result<T> = core::result::Result<T, LostFoundError>;

#[derive(Error, Debug)]
pub enum LostFoundError {
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Document store error: {0}")]
    Store(#[from] StoreError),

    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No user is signed in")]
    NotAuthenticated,

    #[error("Message body cannot be empty")]
    EmptyMessageBody,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("No location provider configured")]
    LocationProviderMissing,

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}
