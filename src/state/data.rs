//! Shared data structures for the application state
//!
//! These structs represent the data model that flows between
//! the database layer and the UI layer.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// The pouch an entry belongs to
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Career,
    Love,
    Growth,
}

impl Category {
    /// All pouches in display order
    pub const ALL: [Category; 3] = [Category::Career, Category::Love, Category::Growth];

    /// Stable label used in storage, on the wire and in snapshot counts
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Career => "career",
            Category::Love => "love",
            Category::Growth => "growth",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Category::Career => "Career · Wealth",
            Category::Love => "Love · Relations",
            Category::Growth => "Growth · Wisdom",
        }
    }

    pub fn subtitle(self) -> &'static str {
        match self {
            Category::Career => "Career & Wealth",
            Category::Love => "Love & Relations",
            Category::Growth => "Growth & Wisdom",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown category: {0}")]
pub struct ParseCategoryError(pub String);

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "career" => Ok(Category::Career),
            "love" => Ok(Category::Love),
            "growth" => Ok(Category::Growth),
            other => Err(ParseCategoryError(other.to_string())),
        }
    }
}

/// A single success entry in the journal
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Entry {
    /// Assigned at creation, never changes
    pub id: Uuid,
    /// Free text; the length cap is applied where users type it
    pub content: String,
    /// Creation time, never changes
    pub timestamp: DateTime<Utc>,
    pub category: Category,
    /// Mirrored to the community feed when set
    pub is_public: bool,
    /// Community likes; only meaningful while public
    pub remote_like_count: i64,
}

impl Entry {
    /// Create a private entry stamped with the current time
    pub fn new(content: impl Into<String>, category: Category) -> Self {
        Self::with_timestamp(content, category, Utc::now())
    }

    pub fn with_timestamp(
        content: impl Into<String>,
        category: Category,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            timestamp,
            category,
            is_public: false,
            remote_like_count: 0,
        }
    }
}
