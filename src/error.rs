//! Error types for life-vault

use thiserror::Error;
use uuid::Uuid;

use crate::entitlement::EntitlementError;

/// Errors raised by the local side: catalog, caches, configuration.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("Entry content is empty")]
    EmptyContent,

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Purchase error: {0}")]
    Entitlement(#[from] EntitlementError),
}

/// Errors raised at the social backend boundary.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Not signed in, cannot publish to the community")]
    NotAuthenticated,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Realtime error: {0}")]
    Realtime(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}
