use crate::error::SyncError;
use chrono::{DateTime, Utc};
use episync_models::{EventKey, Service};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// One reconciled event as last confirmed on both sides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub key: EventKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    pub watched_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trakt_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serializd_id: Option<u64>,
    pub confirmed_at: DateTime<Utc>,
}

/// Lifetime counters, kept across passes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LedgerStats {
    pub passes_run: u64,
    pub created_on_trakt: u64,
    pub created_on_serializd: u64,
    pub conflicts_resolved: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Cursors {
    #[serde(skip_serializing_if = "Option::is_none")]
    trakt: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    serializd: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDoc {
    /// Keyed by the event key's string form so the file stays ordered and
    /// diffable.
    entries: BTreeMap<String, LedgerEntry>,
    cursors: Cursors,
    /// Event keys that must never be re-proposed, with the reason.
    exclusions: BTreeMap<String, String>,
    stats: LedgerStats,
}

/// The persistent record of what has already been reconciled. All mutation
/// happens in memory; `save` writes the whole document. Protected only by
/// the orchestrator's single-pass guard.
pub struct SyncLedger {
    path: PathBuf,
    doc: LedgerDoc,
}

impl SyncLedger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            doc: LedgerDoc::default(),
        }
    }

    /// Load from disk. A file that exists but does not parse is fatal:
    /// proceeding with unknown sync state would duplicate history.
    pub fn load(path: PathBuf) -> Result<Self, SyncError> {
        if !path.exists() {
            info!(path = %path.display(), "no ledger on disk, starting empty");
            return Ok(Self::new(path));
        }
        let content = std::fs::read_to_string(&path).map_err(|e| SyncError::LedgerCorrupt {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        let doc: LedgerDoc =
            serde_json::from_str(&content).map_err(|e| SyncError::LedgerCorrupt {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        debug!(entries = doc.entries.len(), "loaded sync ledger");
        Ok(Self { path, doc })
    }

    pub fn save(&self) -> Result<(), SyncError> {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let content = serde_json::to_string_pretty(&self.doc)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            std::fs::write(&self.path, content)
        };
        write().map_err(|e| SyncError::LedgerWriteFailed {
            path: self.path.clone(),
            detail: e.to_string(),
        })
    }

    pub fn lookup(&self, key: &EventKey) -> Option<&LedgerEntry> {
        self.doc.entries.get(&key.to_string())
    }

    pub fn upsert(&mut self, entry: LedgerEntry) {
        self.doc.entries.insert(entry.key.to_string(), entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.doc.entries.values()
    }

    pub fn cursor(&self, service: Service) -> Option<DateTime<Utc>> {
        match service {
            Service::Trakt => self.doc.cursors.trakt,
            Service::Serializd => self.doc.cursors.serializd,
        }
    }

    pub fn set_cursor(&mut self, service: Service, cursor: Option<DateTime<Utc>>) {
        match service {
            Service::Trakt => self.doc.cursors.trakt = cursor,
            Service::Serializd => self.doc.cursors.serializd = cursor,
        }
    }

    pub fn exclude(&mut self, key: &EventKey, reason: String) {
        self.doc.exclusions.insert(key.to_string(), reason);
    }

    pub fn exclusion(&self, key: &EventKey) -> Option<&String> {
        self.doc.exclusions.get(&key.to_string())
    }

    pub fn exclusions(&self) -> impl Iterator<Item = (&String, &String)> {
        self.doc.exclusions.iter()
    }

    pub fn stats(&self) -> &LedgerStats {
        &self.doc.stats
    }

    pub fn stats_mut(&mut self) -> &mut LedgerStats {
        &mut self.doc.stats
    }

    pub fn entry_count(&self) -> usize {
        self.doc.entries.len()
    }

    /// Discard everything: entries, cursors, exclusions, counters.
    pub fn reset(&mut self) {
        self.doc = LedgerDoc::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use episync_models::ItemKey;

    fn key(episode: u32) -> EventKey {
        EventKey {
            item: ItemKey::Episode {
                tmdb_show_id: 100,
                season: 1,
                episode,
            },
            watched_on: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            rewatch: 0,
        }
    }

    fn entry(episode: u32) -> LedgerEntry {
        LedgerEntry {
            key: key(episode),
            rating: Some(8),
            watched_at: "2024-03-01T20:00:00Z".parse().unwrap(),
            trakt_id: Some(55),
            serializd_id: None,
            confirmed_at: "2024-03-02T00:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        let mut ledger = SyncLedger::new(path.clone());
        ledger.upsert(entry(1));
        ledger.set_cursor(Service::Trakt, Some("2024-03-02T00:00:00Z".parse().unwrap()));
        ledger.exclude(&key(2), "no season on serializd".to_string());
        ledger.stats_mut().passes_run = 3;
        ledger.save().unwrap();

        let reloaded = SyncLedger::load(path).unwrap();
        assert_eq!(reloaded.lookup(&key(1)), Some(&entry(1)));
        assert!(reloaded.cursor(Service::Trakt).is_some());
        assert!(reloaded.cursor(Service::Serializd).is_none());
        assert_eq!(
            reloaded.exclusion(&key(2)),
            Some(&"no season on serializd".to_string())
        );
        assert_eq!(reloaded.stats().passes_run, 3);
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SyncLedger::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(ledger.entry_count(), 0);
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{ not json").unwrap();

        match SyncLedger::load(path) {
            Err(SyncError::LedgerCorrupt { .. }) => {}
            other => panic!("expected LedgerCorrupt, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ledger = SyncLedger::new(PathBuf::from("/tmp/ledger.json"));
        ledger.upsert(entry(1));
        ledger.exclude(&key(2), "reason".to_string());
        ledger.set_cursor(Service::Serializd, Some(Utc::now()));
        ledger.stats_mut().conflicts_resolved = 9;

        ledger.reset();
        assert_eq!(ledger.entry_count(), 0);
        assert!(ledger.exclusions().next().is_none());
        assert!(ledger.cursor(Service::Serializd).is_none());
        assert_eq!(ledger.stats(), &LedgerStats::default());
    }
}
