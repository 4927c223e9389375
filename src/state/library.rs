use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use super::data::{Category, Entry};
use crate::error::VaultError;

/// Demo pouches written on first launch: one sample set per category and how
/// many numbered copies of each sample to write. The totals (3 / 55 / 110)
/// land the three pouches on levels 1, 2 and 3.
const DEMO_SEED: [(Category, &[&str], usize); 3] = [
    (
        Category::Career,
        &[
            "Finished the quarterly report",
            "Proposed a new plan",
            "Got praise from a client",
        ],
        1,
    ),
    (
        Category::Love,
        &[
            "Reached out to an old friend",
            "Cooked dinner for the family",
            "Said thank you and meant it",
            "Smoothed over a small argument",
            "Was there for someone who needed me",
        ],
        11,
    ),
    (
        Category::Growth,
        &[
            "Read a chapter of a book",
            "Kept up morning meditation",
            "Learned a new skill",
            "Owned a failure and reviewed it",
            "Got up on time",
        ],
        22,
    ),
];

/// The Library manages the SQLite entry catalog.
/// It is the source of truth for the user's own entries.
pub struct Library {
    conn: Connection,
    db_path: PathBuf,
}

impl Library {
    /// Open (or create) the catalog at `db_path` and initialize the schema.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let db_path = db_path.into();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path)?;

        info!(path = %db_path.display(), "Entry catalog opened");

        let mut library = Library { conn, db_path };
        library.init_schema()?;

        Ok(library)
    }

    /// In-memory catalog, nothing touches disk
    pub fn in_memory() -> Result<Self, VaultError> {
        let conn = Connection::open_in_memory()?;
        let mut library = Library {
            conn,
            db_path: PathBuf::from(":memory:"),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Initialize the database schema.
    /// Creates all necessary tables and indexes if they don't exist.
    fn init_schema(&mut self) -> Result<(), VaultError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                id                  TEXT PRIMARY KEY,
                content             TEXT NOT NULL,
                timestamp           INTEGER NOT NULL,
                category            TEXT NOT NULL,
                is_public           INTEGER NOT NULL DEFAULT 0,
                remote_like_count   INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        // Newest-first listing and per-pouch listing
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_timestamp
             ON entries(timestamp DESC)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entries_category
             ON entries(category, timestamp DESC)",
            [],
        )?;

        debug!("Entry schema initialized");

        Ok(())
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Total number of entries
    pub fn entry_count(&self) -> Result<i64, VaultError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Number of entries in one pouch
    pub fn count_in(&self, category: Category) -> Result<i64, VaultError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE category = ?1",
            [category.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn insert_entry(&self, entry: &Entry) -> Result<(), VaultError> {
        self.conn.execute(
            "INSERT INTO entries (id, content, timestamp, category, is_public, remote_like_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id.to_string(),
                entry.content,
                entry.timestamp.timestamp_millis(),
                entry.category.as_str(),
                entry.is_public,
                entry.remote_like_count,
            ],
        )?;
        Ok(())
    }

    pub fn get_entry(&self, id: Uuid) -> Result<Option<Entry>, VaultError> {
        let entry = self
            .conn
            .query_row(
                "SELECT id, content, timestamp, category, is_public, remote_like_count
                 FROM entries WHERE id = ?1",
                [id.to_string()],
                entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// Get all entries, newest first
    pub fn get_all_entries(&self) -> Result<Vec<Entry>, VaultError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, content, timestamp, category, is_public, remote_like_count
             FROM entries ORDER BY timestamp DESC",
        )?;

        let entry_iter = stmt.query_map([], entry_from_row)?;

        let mut entries = Vec::new();
        for entry in entry_iter {
            entries.push(entry?);
        }

        Ok(entries)
    }

    /// Get the entries of one pouch, newest first
    pub fn entries_in(&self, category: Category) -> Result<Vec<Entry>, VaultError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, content, timestamp, category, is_public, remote_like_count
             FROM entries
             WHERE category = ?1
             ORDER BY timestamp DESC",
        )?;

        let entry_iter = stmt.query_map([category.as_str()], entry_from_row)?;

        let mut entries = Vec::new();
        for entry in entry_iter {
            entries.push(entry?);
        }

        Ok(entries)
    }

    /// Edit the content and pouch of an entry in place
    pub fn update_entry(
        &self,
        id: Uuid,
        content: &str,
        category: Category,
    ) -> Result<(), VaultError> {
        let changed = self.conn.execute(
            "UPDATE entries SET content = ?1, category = ?2 WHERE id = ?3",
            params![content, category.as_str(), id.to_string()],
        )?;
        expect_one(changed, id)
    }

    /// Flip the community sharing flag. Sharing itself is the caller's job.
    pub fn set_public(&self, id: Uuid, is_public: bool) -> Result<(), VaultError> {
        let changed = self.conn.execute(
            "UPDATE entries SET is_public = ?1 WHERE id = ?2",
            params![is_public, id.to_string()],
        )?;
        expect_one(changed, id)
    }

    /// Delete locally. A remote mirror, if any, is left alone.
    pub fn delete_entry(&self, id: Uuid) -> Result<(), VaultError> {
        let changed = self
            .conn
            .execute("DELETE FROM entries WHERE id = ?1", [id.to_string()])?;
        expect_one(changed, id)
    }

    /// Write the demo pouches in one transaction.
    /// Returns the number of entries written.
    pub fn seed_demo_data(&mut self) -> Result<usize, VaultError> {
        let tx = self.conn.transaction()?;
        let mut written = 0;

        for (category, samples, copies) in DEMO_SEED {
            for base in samples {
                for j in 0..copies {
                    let content = if j == 0 {
                        base.to_string()
                    } else {
                        format!("{base} ({j})")
                    };
                    let entry = Entry::new(content, category);
                    tx.execute(
                        "INSERT INTO entries (id, content, timestamp, category, is_public, remote_like_count)
                         VALUES (?1, ?2, ?3, ?4, 0, 0)",
                        params![
                            entry.id.to_string(),
                            entry.content,
                            entry.timestamp.timestamp_millis(),
                            category.as_str(),
                        ],
                    )?;
                    written += 1;
                }
            }
        }

        tx.commit()?;
        info!(written, "Seeded demo entries");
        Ok(written)
    }
}

fn expect_one(changed: usize, id: Uuid) -> Result<(), VaultError> {
    if changed == 0 {
        Err(VaultError::EntryNotFound(id))
    } else {
        Ok(())
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    let millis: i64 = row.get(2)?;
    let timestamp: DateTime<Utc> = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, millis))?;

    let category: String = row.get(3)?;
    let category = category
        .parse::<Category>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(Entry {
        id,
        content: row.get(1)?,
        timestamp,
        category,
        is_public: row.get(4)?,
        remote_like_count: row.get(5)?,
    })
}

// Implement Debug for better error messages
impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}
