use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable cross-service identity of a watched item, anchored on TMDB ids
/// (the one identifier scheme both services speak natively).
///
/// Once established for an item the key is immutable and reused for every
/// future event on that item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ItemKey {
    Movie {
        tmdb_id: u64,
    },
    Episode {
        tmdb_show_id: u64,
        season: u32,
        episode: u32,
    },
}

impl ItemKey {
    /// TMDB id of the containing show (or the movie itself).
    pub fn tmdb_id(&self) -> u64 {
        match self {
            ItemKey::Movie { tmdb_id } => *tmdb_id,
            ItemKey::Episode { tmdb_show_id, .. } => *tmdb_show_id,
        }
    }

    pub fn season_episode(&self) -> Option<(u32, u32)> {
        match self {
            ItemKey::Movie { .. } => None,
            ItemKey::Episode {
                season, episode, ..
            } => Some((*season, *episode)),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKey::Movie { tmdb_id } => write!(f, "tmdb:{}", tmdb_id),
            ItemKey::Episode {
                tmdb_show_id,
                season,
                episode,
            } => write!(f, "tmdb:{}:s{:02}e{:02}", tmdb_show_id, season, episode),
        }
    }
}
