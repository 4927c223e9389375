//! Widget snapshot for the home-screen widget
//!
//! This struct is a point-in-time projection of the entry catalog.
//! It is serialized to JSON and written to the shared storage channel,
//! where an out-of-process widget picks it up on its own schedule.
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use super::data::Entry;
use super::kv::KeyValueStore;
use crate::error::VaultError;

/// Fixed key the widget reads
pub const WIDGET_KEY: &str = "lifevault.widget.data.v1";

/// Aggregate counts shown on the widget
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSnapshot {
    pub updated_at: DateTime<Utc>,
    /// Entries created on the current calendar day
    pub today_count: usize,
    /// Consecutive days with at least one entry, ending today
    pub streak_days: usize,
    pub total_count: usize,
    /// Text of the most recently favorited community post
    pub last_favorite: Option<String>,
    /// Entry count keyed by category label
    pub pouch_counts: BTreeMap<String, usize>,
}

impl WidgetSnapshot {
    /// An all-zero snapshot
    pub fn empty(updated_at: DateTime<Utc>) -> Self {
        Self {
            updated_at,
            today_count: 0,
            streak_days: 0,
            total_count: 0,
            last_favorite: None,
            pouch_counts: BTreeMap::new(),
        }
    }

    /// Convert to JSON string for the storage channel
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from JSON string (from the storage channel)
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn count_for(&self, label: &str) -> usize {
        self.pouch_counts.get(label).copied().unwrap_or(0)
    }
}

/// Build a snapshot against the local calendar.
pub fn build_snapshot(entries: &[Entry], previous_last_favorite: Option<String>) -> WidgetSnapshot {
    build_snapshot_at(entries, previous_last_favorite, Local::now())
}

/// Build a snapshot with `now` deciding what "today" is. Calendar days are
/// taken in `now`'s time zone.
pub fn build_snapshot_at<Tz: TimeZone>(
    entries: &[Entry],
    previous_last_favorite: Option<String>,
    now: DateTime<Tz>,
) -> WidgetSnapshot {
    let tz = now.timezone();
    let today = now.date_naive();
    let day_of = |entry: &Entry| entry.timestamp.with_timezone(&tz).date_naive();

    let today_count = entries.iter().filter(|&e| day_of(e) == today).count();

    let active_days: HashSet<NaiveDate> = entries.iter().map(day_of).collect();
    let mut streak_days = 0;
    let mut cursor = today;
    while active_days.contains(&cursor) {
        streak_days += 1;
        match cursor.pred_opt() {
            Some(prev) => cursor = prev,
            None => break,
        }
    }

    let mut pouch_counts = BTreeMap::new();
    for entry in entries {
        *pouch_counts
            .entry(entry.category.as_str().to_string())
            .or_insert(0) += 1;
    }

    WidgetSnapshot {
        updated_at: now.with_timezone(&Utc),
        today_count,
        streak_days,
        total_count: entries.len(),
        last_favorite: previous_last_favorite,
        pouch_counts,
    }
}

/// The shared storage channel the widget reads from
#[derive(Clone)]
pub struct WidgetChannel {
    store: Arc<dyn KeyValueStore>,
}

impl WidgetChannel {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Latest published snapshot. Unreadable data counts as none.
    pub fn read(&self) -> Option<WidgetSnapshot> {
        match self.store.get_json::<WidgetSnapshot>(WIDGET_KEY) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable widget snapshot");
                None
            }
        }
    }

    pub fn write(&self, snapshot: &WidgetSnapshot) -> Result<(), VaultError> {
        self.store.set_json(WIDGET_KEY, snapshot)
    }

    /// Recompute from the full entry set and publish.
    /// The last favorite is carried over from whatever was published before.
    pub fn update_from_entries(&self, entries: &[Entry]) -> Result<WidgetSnapshot, VaultError> {
        let previous = self.read().and_then(|s| s.last_favorite);
        let snapshot = build_snapshot(entries, previous);
        self.write(&snapshot)?;
        debug!(
            total = snapshot.total_count,
            today = snapshot.today_count,
            streak = snapshot.streak_days,
            "Widget snapshot published"
        );
        Ok(snapshot)
    }

    /// Replace only the last favorite text, keeping the counts as published.
    pub fn update_last_favorite(&self, text: Option<String>) -> Result<WidgetSnapshot, VaultError> {
        let now = Utc::now();
        let mut snapshot = self.read().unwrap_or_else(|| WidgetSnapshot::empty(now));
        snapshot.updated_at = now;
        snapshot.last_favorite = text;
        self.write(&snapshot)?;
        Ok(snapshot)
    }
}

impl std::fmt::Debug for WidgetChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetChannel").field("key", &WIDGET_KEY).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::Category;
    use crate::state::kv::MemoryStore;
    use chrono::Duration;

    fn noon(days_ago: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap() - Duration::days(days_ago)
    }

    fn entry_on(days_ago: i64, category: Category) -> Entry {
        Entry::with_timestamp("x", category, noon(days_ago))
    }

    #[test]
    fn test_streak_stops_at_first_gap() {
        let entries = vec![
            entry_on(0, Category::Career),
            entry_on(1, Category::Love),
            entry_on(2, Category::Growth),
            entry_on(4, Category::Career),
        ];
        let snapshot = build_snapshot_at(&entries, None, noon(0));
        assert_eq!(snapshot.streak_days, 3);
        assert_eq!(snapshot.today_count, 1);
        assert_eq!(snapshot.total_count, 4);
    }

    #[test]
    fn test_no_entry_today_means_no_streak() {
        let entries = vec![entry_on(1, Category::Love), entry_on(2, Category::Love)];
        let snapshot = build_snapshot_at(&entries, None, noon(0));
        assert_eq!(snapshot.streak_days, 0);
        assert_eq!(snapshot.today_count, 0);
    }

    #[test]
    fn test_several_entries_on_one_day_count_once_for_streak() {
        let entries = vec![
            entry_on(0, Category::Career),
            entry_on(0, Category::Career),
            entry_on(1, Category::Growth),
        ];
        let snapshot = build_snapshot_at(&entries, None, noon(0));
        assert_eq!(snapshot.streak_days, 2);
        assert_eq!(snapshot.today_count, 2);
        assert_eq!(snapshot.count_for("career"), 2);
        assert_eq!(snapshot.count_for("growth"), 1);
        assert_eq!(snapshot.count_for("love"), 0);
    }

    #[test]
    fn test_builder_carries_last_favorite() {
        let snapshot = build_snapshot_at(&[], Some("kept".to_string()), noon(0));
        assert_eq!(snapshot.last_favorite.as_deref(), Some("kept"));
        assert_eq!(snapshot.total_count, 0);
    }

    #[test]
    fn test_new_entry_bumps_totals_and_keeps_favorite() {
        let channel = WidgetChannel::new(Arc::new(MemoryStore::new()));
        let mut entries = vec![Entry::new("earlier", Category::Love)];
        channel.update_from_entries(&entries).unwrap();
        channel.update_last_favorite(Some("a kind word".to_string())).unwrap();
        let before = channel.read().unwrap();

        entries.push(Entry::new("A", Category::Career));
        let after = channel.update_from_entries(&entries).unwrap();

        assert_eq!(after.total_count, before.total_count + 1);
        assert_eq!(after.count_for("career"), before.count_for("career") + 1);
        assert_eq!(after.last_favorite, before.last_favorite);
        assert_eq!(channel.read(), Some(after));
    }

    #[test]
    fn test_last_favorite_update_keeps_counts() {
        let channel = WidgetChannel::new(Arc::new(MemoryStore::new()));
        channel
            .update_from_entries(&[Entry::new("one", Category::Growth)])
            .unwrap();
        let updated = channel.update_last_favorite(Some("hello".to_string())).unwrap();
        assert_eq!(updated.total_count, 1);
        assert_eq!(updated.last_favorite.as_deref(), Some("hello"));
    }

    #[test]
    fn test_wire_field_names() {
        let snapshot = WidgetSnapshot::empty(noon(0));
        let json = snapshot.to_json().unwrap();
        for field in ["updatedAt", "todayCount", "streakDays", "totalCount", "lastFavorite", "pouchCounts"] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
        assert_eq!(WidgetSnapshot::from_json(&json).unwrap(), snapshot);
    }
}
