use episync_models::ItemKey;
use episync_services::RawWatchRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Outcome of mapping one native record onto the cross-service key space.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(ItemKey),
    /// Skipped for this pass; the reason lands in the pass report.
    Unmatched(String),
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct AliasMap {
    /// normalized title -> TMDB show id, learned from records that carried
    /// both. BTreeMap keeps the file diffable.
    titles: BTreeMap<String, u64>,
}

/// Maps native watch records onto stable `ItemKey`s. Both services speak
/// TMDB ids natively, so the common path is exact; title aliases cover
/// records that arrive without one, and every mapping learned from a record
/// with both is persisted so future resolutions are exact.
pub struct IdentityResolver {
    path: PathBuf,
    aliases: AliasMap,
    dirty: bool,
}

impl IdentityResolver {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            aliases: AliasMap::default(),
            dirty: false,
        }
    }

    pub fn load(&mut self) -> anyhow::Result<()> {
        if self.path.exists() {
            let content = std::fs::read_to_string(&self.path)?;
            self.aliases = serde_json::from_str(&content)?;
        }
        Ok(())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.aliases)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn resolve(&mut self, record: &RawWatchRecord) -> Resolution {
        let tmdb_id = match record.tmdb_id {
            Some(id) => {
                self.learn(record.title.as_deref(), id);
                id
            }
            None => match record
                .title
                .as_deref()
                .map(normalize_title)
                .and_then(|t| self.aliases.titles.get(&t).copied())
            {
                Some(id) => id,
                None => {
                    return Resolution::Unmatched(format!(
                        "no TMDB id for '{}'",
                        record.title.as_deref().unwrap_or("<untitled>")
                    ))
                }
            },
        };

        match (record.season, record.episode) {
            (Some(season), Some(episode)) => Resolution::Resolved(ItemKey::Episode {
                tmdb_show_id: tmdb_id,
                season,
                episode,
            }),
            (None, None) => Resolution::Resolved(ItemKey::Movie { tmdb_id }),
            _ => Resolution::Unmatched(format!(
                "record for TMDB {} has a season without an episode number",
                tmdb_id
            )),
        }
    }

    fn learn(&mut self, title: Option<&str>, tmdb_id: u64) {
        if let Some(title) = title {
            let normalized = normalize_title(title);
            if normalized.is_empty() {
                return;
            }
            let previous = self.aliases.titles.insert(normalized.clone(), tmdb_id);
            if previous != Some(tmdb_id) {
                self.dirty = true;
                debug!(title = %normalized, tmdb_id, "learned title alias");
            }
        }
    }
}

/// Lowercased, alphanumeric words joined by single spaces, so punctuation
/// and casing differences between the services collapse.
fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use episync_models::Service;

    fn record(
        tmdb_id: Option<u64>,
        title: Option<&str>,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> RawWatchRecord {
        RawWatchRecord {
            origin: Service::Trakt,
            tmdb_id,
            season,
            episode,
            title: title.map(str::to_string),
            watched_at: Utc::now(),
            native_rating: None,
            last_modified: Utc::now(),
            native_id: None,
        }
    }

    #[test]
    fn test_exact_tmdb_match() {
        let mut resolver = IdentityResolver::new(PathBuf::from("/tmp/aliases.json"));
        let res = resolver.resolve(&record(Some(42), Some("Severance"), Some(1), Some(3)));
        assert_eq!(
            res,
            Resolution::Resolved(ItemKey::Episode {
                tmdb_show_id: 42,
                season: 1,
                episode: 3
            })
        );
    }

    #[test]
    fn test_learned_alias_resolves_later_record() {
        let mut resolver = IdentityResolver::new(PathBuf::from("/tmp/aliases.json"));
        resolver.resolve(&record(Some(42), Some("The Wire"), Some(1), Some(1)));

        // Same title, different punctuation, no id this time
        let res = resolver.resolve(&record(None, Some("the wire!"), Some(2), Some(5)));
        assert_eq!(
            res,
            Resolution::Resolved(ItemKey::Episode {
                tmdb_show_id: 42,
                season: 2,
                episode: 5
            })
        );
    }

    #[test]
    fn test_unmatched_without_id_or_alias() {
        let mut resolver = IdentityResolver::new(PathBuf::from("/tmp/aliases.json"));
        let res = resolver.resolve(&record(None, Some("Unknown Show"), Some(1), Some(1)));
        assert!(matches!(res, Resolution::Unmatched(_)));
    }

    #[test]
    fn test_aliases_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");

        let mut resolver = IdentityResolver::new(path.clone());
        resolver.resolve(&record(Some(7), Some("Andor"), None, None));
        resolver.save().unwrap();

        let mut reloaded = IdentityResolver::new(path);
        reloaded.load().unwrap();
        let res = reloaded.resolve(&record(None, Some("Andor"), None, None));
        assert_eq!(res, Resolution::Resolved(ItemKey::Movie { tmdb_id: 7 }));
    }
}
