//! Social backend boundary
//!
//! Posts, per-user likes and favorites live on a hosted backend. The core
//! only talks to it through [`SocialBackend`]; [`rest::RestBackend`] is the
//! production implementation and [`OfflineBackend`] stands in when no backend
//! is configured.

pub mod realtime;
pub mod rest;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RemoteError;

pub use rest::RestBackend;

/// Feed page size when none is configured
pub const DEFAULT_PAGE_SIZE: usize = 60;

/// A publicly shared entry as the backend stores it.
/// Field names on the wire are the backend's column names.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemotePost {
    pub id: Uuid,
    /// Anonymous, device-scoped author id
    #[serde(rename = "user_id")]
    pub author_id: Uuid,
    #[serde(rename = "nickname")]
    pub display_name: String,
    #[serde(rename = "vault_name")]
    pub category_label: String,
    pub content: String,
    #[serde(rename = "likes_count")]
    pub like_count: i64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait SocialBackend: Send + Sync {
    /// Newest-first page of the community feed
    async fn fetch_posts(&self, limit: usize) -> Result<Vec<RemotePost>, RemoteError>;

    /// Publish a post as the current user, signing in anonymously first if needed
    async fn share_post(&self, content: &str, vault_name: &str) -> Result<(), RemoteError>;

    async fn fetch_liked_post_ids(&self) -> Result<HashSet<Uuid>, RemoteError>;

    async fn like_post(&self, post_id: Uuid) -> Result<(), RemoteError>;

    async fn fetch_favorited_post_ids(&self) -> Result<HashSet<Uuid>, RemoteError>;

    async fn favorite_post(&self, post_id: Uuid) -> Result<(), RemoteError>;

    /// Open a server-push subscription to newly inserted posts.
    /// The subscription ends when the receiver is dropped.
    async fn subscribe_inserts(&self) -> Result<mpsc::Receiver<RemotePost>, RemoteError>;
}

/// Backend used when nothing is configured. Every call fails, which puts the
/// feed on its placeholder content.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineBackend;

impl OfflineBackend {
    fn unavailable<T>() -> Result<T, RemoteError> {
        Err(RemoteError::Unavailable("no backend configured".to_string()))
    }
}

#[async_trait]
impl SocialBackend for OfflineBackend {
    async fn fetch_posts(&self, _limit: usize) -> Result<Vec<RemotePost>, RemoteError> {
        Self::unavailable()
    }

    async fn share_post(&self, _content: &str, _vault_name: &str) -> Result<(), RemoteError> {
        Self::unavailable()
    }

    async fn fetch_liked_post_ids(&self) -> Result<HashSet<Uuid>, RemoteError> {
        Self::unavailable()
    }

    async fn like_post(&self, _post_id: Uuid) -> Result<(), RemoteError> {
        Self::unavailable()
    }

    async fn fetch_favorited_post_ids(&self) -> Result<HashSet<Uuid>, RemoteError> {
        Self::unavailable()
    }

    async fn favorite_post(&self, _post_id: Uuid) -> Result<(), RemoteError> {
        Self::unavailable()
    }

    async fn subscribe_inserts(&self) -> Result<mpsc::Receiver<RemotePost>, RemoteError> {
        Self::unavailable()
    }
}
