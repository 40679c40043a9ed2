use crate::service::Service;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which direction(s) a pass is allowed to write in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    Both,
    TraktToSerializd,
    SerializdToTrakt,
}

impl SyncDirection {
    /// Whether events originating on `from` may be written to the other side.
    pub fn allows_from(self, from: Service) -> bool {
        match (self, from) {
            (SyncDirection::Both, _) => true,
            (SyncDirection::TraktToSerializd, Service::Trakt) => true,
            (SyncDirection::SerializdToTrakt, Service::Serializd) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncDirection::Both => "both",
            SyncDirection::TraktToSerializd => "trakt-to-serializd",
            SyncDirection::SerializdToTrakt => "serializd-to-trakt",
        }
    }
}

impl Default for SyncDirection {
    fn default() -> Self {
        SyncDirection::Both
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "both" => Ok(SyncDirection::Both),
            "trakt-to-serializd" => Ok(SyncDirection::TraktToSerializd),
            "serializd-to-trakt" => Ok(SyncDirection::SerializdToTrakt),
            other => Err(format!(
                "invalid direction '{}' (use 'both', 'trakt-to-serializd', or 'serializd-to-trakt')",
                other
            )),
        }
    }
}

/// How diverging field values on linked events are resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    TraktWins,
    SerializdWins,
    /// Later `last_modified` wins; an exact tie falls back to Trakt so the
    /// outcome is stable under input reordering.
    NewestWins,
}

impl ConflictStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictStrategy::TraktWins => "trakt-wins",
            ConflictStrategy::SerializdWins => "serializd-wins",
            ConflictStrategy::NewestWins => "newest-wins",
        }
    }
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::TraktWins
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trakt-wins" => Ok(ConflictStrategy::TraktWins),
            "serializd-wins" => Ok(ConflictStrategy::SerializdWins),
            "newest-wins" => Ok(ConflictStrategy::NewestWins),
            other => Err(format!(
                "invalid strategy '{}' (use 'trakt-wins', 'serializd-wins', or 'newest-wins')",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_filter() {
        assert!(SyncDirection::Both.allows_from(Service::Trakt));
        assert!(SyncDirection::Both.allows_from(Service::Serializd));
        assert!(SyncDirection::TraktToSerializd.allows_from(Service::Trakt));
        assert!(!SyncDirection::TraktToSerializd.allows_from(Service::Serializd));
        assert!(!SyncDirection::SerializdToTrakt.allows_from(Service::Trakt));
    }

    #[test]
    fn test_round_trip_parse() {
        for d in ["both", "trakt-to-serializd", "serializd-to-trakt"] {
            assert_eq!(d.parse::<SyncDirection>().unwrap().as_str(), d);
        }
        for s in ["trakt-wins", "serializd-wins", "newest-wins"] {
            assert_eq!(s.parse::<ConflictStrategy>().unwrap().as_str(), s);
        }
        assert!("oldest-wins".parse::<ConflictStrategy>().is_err());
    }
}
