//! Application context
//!
//! One `App` per process. It owns the entry catalog and wires the caches,
//! the social backend and the entitlement gate together. Every entry
//! mutation republishes the widget snapshot.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::community::CommunityFeed;
use crate::config::Config;
use crate::entitlement::{EntitlementGate, EntitlementLedger, SandboxLedger};
use crate::error::VaultError;
use crate::favorites::FavoritesStore;
use crate::remote::{OfflineBackend, RestBackend, SocialBackend};
use crate::state::data::{Category, Entry};
use crate::state::kv::{JsonFileStore, KeyValueStore};
use crate::state::library::Library;
use crate::state::snapshot::{WidgetChannel, WidgetSnapshot};
use crate::tier::Level;

/// Longest entry the user can save, in characters
pub const MAX_CONTENT_CHARS: usize = 30;

const DEMO_SEEDED_KEY: &str = "com.lifevault.demoDataSeeded.v1";

/// What a pouch shows: its count and where that puts it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PouchSummary {
    pub category: Category,
    pub count: u64,
    pub level: Level,
    /// Progress through the current level, 0-1
    pub progress: f64,
    /// Past the top threshold without pro
    pub locked: bool,
}

pub struct App {
    config: Config,
    library: Library,
    cache: Arc<dyn KeyValueStore>,
    widget: WidgetChannel,
    backend: Arc<dyn SocialBackend>,
    gate: EntitlementGate,
}

impl App {
    /// Open everything under the configured data directory.
    pub fn open(config: Config) -> Result<Self, VaultError> {
        let cache: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(config.cache_dir())?);
        let shared: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(config.shared_dir())?);
        let library = Library::open(config.db_path())?;

        let backend: Arc<dyn SocialBackend> = match config.rest() {
            Some(rest) => {
                info!(url = %rest.base_url, "Using community backend");
                Arc::new(RestBackend::new(rest, Arc::clone(&cache))?)
            }
            None => {
                info!("No community backend configured, running offline");
                Arc::new(OfflineBackend)
            }
        };

        let ledger: Arc<dyn EntitlementLedger> = Arc::new(SandboxLedger::open(Arc::clone(&cache))?);
        let gate = EntitlementGate::restore(ledger, Arc::clone(&cache));

        Self::new(config, library, cache, WidgetChannel::new(shared), backend, gate)
    }

    /// Assemble from parts. Seeds the demo pouches on first launch and
    /// publishes a fresh widget snapshot.
    pub fn new(
        config: Config,
        mut library: Library,
        cache: Arc<dyn KeyValueStore>,
        widget: WidgetChannel,
        backend: Arc<dyn SocialBackend>,
        gate: EntitlementGate,
    ) -> Result<Self, VaultError> {
        if config.seed_demo_data && !cache.get_bool(DEMO_SEEDED_KEY) {
            if library.entry_count()? == 0 {
                library.seed_demo_data()?;
            }
            cache.set_bool(DEMO_SEEDED_KEY, true)?;
        }

        let app = Self {
            config,
            library,
            cache,
            widget,
            backend,
            gate,
        };
        app.refresh_widget();
        Ok(app)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn gate(&self) -> &EntitlementGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut EntitlementGate {
        &mut self.gate
    }

    pub fn is_pro(&self) -> bool {
        self.gate.is_pro()
    }

    /// Save a new private entry. Content is trimmed and capped.
    pub fn save_entry(&self, content: &str, category: Category) -> Result<Entry, VaultError> {
        let content = normalize_content(content)?;
        let entry = Entry::new(content, category);
        self.library.insert_entry(&entry)?;
        debug!(id = %entry.id, category = %category, "Entry saved");
        self.refresh_widget();
        Ok(entry)
    }

    /// Save a new entry and publish it straight away. The entry is kept
    /// (private) even when the publish fails; the error is returned.
    pub async fn save_and_share(&self, content: &str, category: Category) -> Result<Entry, VaultError> {
        let mut entry = self.save_entry(content, category)?;
        self.share_entry(entry.id).await?;
        entry.is_public = true;
        Ok(entry)
    }

    pub fn edit_entry(&self, id: Uuid, content: &str, category: Category) -> Result<(), VaultError> {
        let content = normalize_content(content)?;
        self.library.update_entry(id, &content, category)?;
        self.refresh_widget();
        Ok(())
    }

    pub fn delete_entry(&self, id: Uuid) -> Result<(), VaultError> {
        self.library.delete_entry(id)?;
        self.refresh_widget();
        Ok(())
    }

    /// Publish an entry to the community feed and mark it public.
    /// The flag is only set once the remote insert succeeded. Sharing an
    /// entry that is already public does nothing.
    pub async fn share_entry(&self, id: Uuid) -> Result<(), VaultError> {
        let entry = self
            .library
            .get_entry(id)?
            .ok_or(VaultError::EntryNotFound(id))?;
        if entry.is_public {
            return Ok(());
        }

        self.backend
            .share_post(&entry.content, entry.category.display_name())
            .await?;
        self.library.set_public(id, true)?;
        info!(%id, "Entry shared to the community");
        Ok(())
    }

    /// Clear the public flag. The remote post stays.
    pub fn make_private(&self, id: Uuid) -> Result<(), VaultError> {
        self.library.set_public(id, false)
    }

    pub fn entries(&self, category: Option<Category>) -> Result<Vec<Entry>, VaultError> {
        match category {
            Some(category) => self.library.entries_in(category),
            None => self.library.get_all_entries(),
        }
    }

    pub fn pouch_summaries(&self) -> Result<Vec<PouchSummary>, VaultError> {
        let is_pro = self.gate.is_pro();
        Category::ALL
            .iter()
            .map(|&category| {
                let count = self.library.count_in(category)?.max(0) as u64;
                let level = Level::for_count(count, is_pro);
                Ok(PouchSummary {
                    category,
                    count,
                    level,
                    progress: level.progress(count),
                    locked: Level::is_level4_locked(count, is_pro),
                })
            })
            .collect()
    }

    /// The snapshot as the widget currently sees it
    pub fn snapshot(&self) -> Option<WidgetSnapshot> {
        self.widget.read()
    }

    /// A feed for this session, sharing the backend, cache and pro flag
    pub fn community_feed(&self) -> CommunityFeed {
        let favorites =
            FavoritesStore::with_limit(Arc::clone(&self.cache), self.config.favorites_free_limit);
        CommunityFeed::new(Arc::clone(&self.backend), favorites, self.gate.subscribe())
            .with_widget(self.widget.clone())
            .with_page_size(self.config.feed_page_size)
    }

    /// Recompute and publish the widget snapshot. A failed publish only
    /// leaves the widget stale.
    fn refresh_widget(&self) {
        let published = self
            .library
            .get_all_entries()
            .and_then(|entries| self.widget.update_from_entries(&entries));
        if let Err(e) = published {
            warn!(error = %e, "Widget snapshot not published");
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("library", &self.library)
            .field("gate", &self.gate)
            .finish()
    }
}

fn normalize_content(content: &str) -> Result<String, VaultError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(VaultError::EmptyContent);
    }
    Ok(trimmed.chars().take(MAX_CONTENT_CHARS).collect())
}
