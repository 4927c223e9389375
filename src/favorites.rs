//! Local favorites cache
//!
//! A persisted copy of favorited community posts, newest first. Free users
//! are capped at [`FREE_LIMIT`] entries; going over is an explicit rejection,
//! never a silent drop or eviction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::remote::RemotePost;
use crate::state::kv::KeyValueStore;

/// Favorites a free user may keep
pub const FREE_LIMIT: usize = 8;

const STORAGE_KEY: &str = "communityFavorites";

/// Display fields of a favorited post, frozen at save time
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteEntry {
    /// Remote post id
    pub id: String,
    pub author: String,
    pub pouch_name: String,
    pub content: String,
    pub saved_at: DateTime<Utc>,
}

impl FavoriteEntry {
    fn from_post(post: &RemotePost, saved_at: DateTime<Utc>) -> Self {
        Self {
            id: post.id.to_string(),
            author: post.display_name.clone(),
            pouch_name: post.category_label.clone(),
            content: post.content.clone(),
            saved_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyFavorited,
    /// Free limit reached; the caller should offer the upgrade
    QuotaExceeded,
}

impl AddOutcome {
    pub fn is_accepted(self) -> bool {
        !matches!(self, AddOutcome::QuotaExceeded)
    }
}

pub struct FavoritesStore {
    entries: Vec<FavoriteEntry>,
    limit: usize,
    store: Arc<dyn KeyValueStore>,
}

impl FavoritesStore {
    /// Load persisted favorites with the default free limit
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_limit(store, FREE_LIMIT)
    }

    pub fn with_limit(store: Arc<dyn KeyValueStore>, limit: usize) -> Self {
        let entries = match store.get_json::<Vec<FavoriteEntry>>(STORAGE_KEY) {
            Ok(saved) => saved.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Unreadable favorites cache, starting empty");
                Vec::new()
            }
        };
        Self {
            entries,
            limit,
            store,
        }
    }

    pub fn entries(&self) -> &[FavoriteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_favorited(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// The only way in. Checks the quota before touching anything.
    pub fn add(&mut self, post: &RemotePost, is_pro: bool) -> AddOutcome {
        let id = post.id.to_string();
        if self.is_favorited(&id) {
            return AddOutcome::AlreadyFavorited;
        }
        if !is_pro && self.entries.len() >= self.limit {
            debug!(limit = self.limit, "Favorite rejected by free limit");
            return AddOutcome::QuotaExceeded;
        }
        self.entries.insert(0, FavoriteEntry::from_post(post, Utc::now()));
        self.save();
        AddOutcome::Added
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.save();
        }
        removed
    }

    fn save(&self) {
        if let Err(e) = self.store.set_json(STORAGE_KEY, &self.entries) {
            warn!(error = %e, "Could not persist favorites");
        }
    }
}

impl std::fmt::Debug for FavoritesStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FavoritesStore")
            .field("len", &self.entries.len())
            .field("limit", &self.limit)
            .finish()
    }
}
