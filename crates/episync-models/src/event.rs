use crate::item::ItemKey;
use crate::service::Service;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One instance of "this item was watched", normalized to the canonical
/// representation regardless of which service produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchEvent {
    pub item: ItemKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Source of truth for diary ordering.
    pub watched_at: DateTime<Utc>,
    /// Ordinal among same-day watches of the same item. Rewatches are
    /// independent events and are never merged.
    pub rewatch: u32,
    /// Canonical 0-10 scale; `None` means unrated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    pub origin: Service,
    /// For newest-wins comparisons.
    pub last_modified: DateTime<Utc>,
    /// Native record id on the origin service, when the service exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_id: Option<u64>,
}

impl WatchEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            item: self.item,
            watched_on: self.watched_at.date_naive(),
            rewatch: self.rewatch,
        }
    }
}

/// Dedup key: (item, watched-on date, rewatch ordinal) is unique within a
/// service's event set and is how "already represented on the other side"
/// is detected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub item: ItemKey,
    pub watched_on: NaiveDate,
    pub rewatch: u32,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.item, self.watched_on, self.rewatch)
    }
}

/// A show-level rating with no episode row behind it. Carried separately so
/// the planner can report it instead of inventing a watch for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShowRating {
    pub tmdb_show_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub rating: u8,
    pub origin: Service,
    pub last_modified: DateTime<Utc>,
}
