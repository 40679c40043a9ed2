use episync_models::{ConflictStrategy, SyncDirection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub trakt: TraktConfig,
    pub serializd: SerializdConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TraktConfig {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SerializdConfig {
    pub email: String,
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default)]
    pub direction: SyncDirection,
    #[serde(default)]
    pub strategy: ConflictStrategy,
    /// Seconds between passes in watch mode.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Per-service fetch deadline, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_fetch_timeout_secs() -> u64 {
    120
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            direction: SyncDirection::default(),
            strategy: ConflictStrategy::default(),
            interval_secs: default_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config at {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml_str = r#"
            [trakt]
            client_id = "abc"
            client_secret = "def"
            username = "alice"

            [serializd]
            email = "alice@example.com"
            username = "alice"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sync.direction, SyncDirection::Both);
        assert_eq!(config.sync.strategy, ConflictStrategy::TraktWins);
        assert_eq!(config.sync.interval_secs, 3600);
    }

    #[test]
    fn test_parse_sync_overrides() {
        let toml_str = r#"
            [trakt]
            client_id = "abc"
            client_secret = "def"
            username = "alice"

            [serializd]
            email = "alice@example.com"
            username = "alice"

            [sync]
            direction = "serializd-to-trakt"
            strategy = "newest-wins"
            interval_secs = 600
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sync.direction, SyncDirection::SerializdToTrakt);
        assert_eq!(config.sync.strategy, ConflictStrategy::NewestWins);
        assert_eq!(config.sync.interval_secs, 600);
    }
}
