//! Life Vault core
//!
//! Local-first success journal. Entries live in a SQLite catalog and are
//! sorted into three pouches whose counts map to tiers. Public entries are
//! mirrored to a community feed with likes and favorites, and a derived
//! snapshot is published for the home-screen widget.
//!
//! Module map:
//! - `tier` - pure level/progress model for pouch counts
//! - `state` - entry catalog, key-value storage, widget snapshot
//! - `favorites` - bounded local cache of favorited community posts
//! - `remote` - social backend boundary (REST + realtime)
//! - `community` - feed cache with optimistic likes/favorites
//! - `entitlement` - pro flag gate over the purchase ledger
//! - `app` - application-scoped context wiring the services together

pub mod app;
pub mod community;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod favorites;
pub mod remote;
pub mod state;
pub mod tier;

pub use app::{App, PouchSummary};
pub use community::{CommunityFeed, FeedState};
pub use config::Config;
pub use entitlement::EntitlementGate;
pub use error::{RemoteError, VaultError};
pub use favorites::{AddOutcome, FavoriteEntry, FavoritesStore};
pub use remote::{RemotePost, SocialBackend};
pub use state::data::{Category, Entry};
pub use state::snapshot::{WidgetChannel, WidgetSnapshot};
pub use tier::Level;
