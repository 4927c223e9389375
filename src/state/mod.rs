/// State management module
///
/// This module handles all local application state, including:
/// - Database connections and queries (library.rs)
/// - Shared data structures (data.rs)
/// - Key-value caches and the widget storage channel (kv.rs)
/// - The derived widget snapshot (snapshot.rs)

pub mod data;
pub mod kv;
pub mod library;
pub mod snapshot;
