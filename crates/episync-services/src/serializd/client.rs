use crate::error::ServiceError;
use crate::serializd::api;
use crate::traits::{HistoryPage, RawShowRating, RawWatchRecord, TrackingService};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use episync_config::{CredentialStore, PathManager};
use episync_models::{ItemKey, Service, WatchEvent};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Minimum gap between requests; the API is unofficial and unforgiving.
const REQUEST_INTERVAL: StdDuration = StdDuration::from_millis(200);

pub struct SerializdClient {
    client: Arc<Client>,
    token: Option<String>,
    email: String,
    username: String,
    /// show id -> season number -> internal season id, filled lazily.
    season_cache: Mutex<HashMap<u64, HashMap<u32, u64>>>,
    last_request: Mutex<Option<Instant>>,
}

impl SerializdClient {
    pub fn new(email: String, username: String) -> Self {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client: Arc::new(client),
            token: None,
            email,
            username,
            season_cache: Mutex::new(HashMap::new()),
            last_request: Mutex::new(None),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    fn token(&self) -> Result<&str, ServiceError> {
        self.token
            .as_deref()
            .ok_or_else(|| ServiceError::AuthExpired("serializd: not authenticated".to_string()))
    }

    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < REQUEST_INTERVAL {
                tokio::time::sleep(REQUEST_INTERVAL - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Interactive login. The CLI prompts for the password; the token is
    /// persisted so later passes can authenticate silently.
    pub async fn login(&mut self, password: &str) -> Result<(), ServiceError> {
        self.pace().await;
        let token = api::login(&self.client, &self.email, password).await?;

        let path_manager = PathManager::default();
        let mut cred_store = CredentialStore::new(path_manager.credentials_file());
        cred_store
            .load()
            .map_err(|e| ServiceError::Protocol(format!("credential store: {}", e)))?;
        cred_store.set_serializd_token(token.clone());
        cred_store
            .save()
            .map_err(|e| ServiceError::Protocol(format!("credential store: {}", e)))?;

        self.token = Some(token);
        info!("Authenticated to Serializd");
        Ok(())
    }

    async fn season_map(&self, show_id: u64) -> Result<HashMap<u32, u64>, ServiceError> {
        {
            let cache = self.season_cache.lock().await;
            if let Some(map) = cache.get(&show_id) {
                return Ok(map.clone());
            }
        }
        self.pace().await;
        let token = self.token()?;
        let seasons = api::get_show_seasons(&self.client, token, show_id).await?;
        let map: HashMap<u32, u64> = seasons.iter().map(|s| (s.season_number, s.id)).collect();
        debug!(show_id, seasons = map.len(), "cached serializd season map");
        self.season_cache.lock().await.insert(show_id, map.clone());
        Ok(map)
    }

    async fn season_id(&self, show_id: u64, season: u32) -> Result<u64, ServiceError> {
        let map = self.season_map(show_id).await?;
        map.get(&season).copied().ok_or_else(|| {
            ServiceError::Unsupported(format!(
                "serializd: show {} has no season {}",
                show_id, season
            ))
        })
    }

    async fn season_number(&self, show_id: u64, season_id: u64) -> Result<Option<u32>, ServiceError> {
        let map = self.season_map(show_id).await?;
        Ok(map
            .iter()
            .find(|(_, id)| **id == season_id)
            .map(|(number, _)| *number))
    }

    fn episode_parts(event: &WatchEvent) -> Result<(u64, u32, u32), ServiceError> {
        match event.item {
            ItemKey::Episode {
                tmdb_show_id,
                season,
                episode,
            } => Ok((tmdb_show_id, season, episode)),
            ItemKey::Movie { .. } => Err(ServiceError::Unsupported(
                "serializd does not track movies".to_string(),
            )),
        }
    }
}

/// Diary timestamps arrive in a few shapes; full RFC 3339, a naive datetime,
/// or a bare date.
fn parse_diary_date(s: &str) -> Result<DateTime<Utc>, ServiceError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }
    Err(ServiceError::Protocol(format!(
        "serializd: unparseable diary date '{}'",
        s
    )))
}

#[async_trait]
impl TrackingService for SerializdClient {
    fn service(&self) -> Service {
        Service::Serializd
    }

    async fn authenticate(&mut self) -> Result<(), ServiceError> {
        let path_manager = PathManager::default();
        let mut cred_store = CredentialStore::new(path_manager.credentials_file());
        cred_store
            .load()
            .map_err(|e| ServiceError::Protocol(format!("credential store: {}", e)))?;

        let saved = cred_store.get_serializd_token().cloned().ok_or_else(|| {
            ServiceError::AuthExpired(
                "serializd: no saved token, run 'episync auth serializd'".to_string(),
            )
        })?;

        self.pace().await;
        if api::validate_token(&self.client, &saved).await? {
            self.token = Some(saved);
            info!("Using saved Serializd token");
            Ok(())
        } else {
            Err(ServiceError::AuthExpired(
                "serializd: saved token rejected, run 'episync auth serializd'".to_string(),
            ))
        }
    }

    fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    async fn fetch_watch_history(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<HistoryPage, ServiceError> {
        let token = self.token()?.to_string();
        let mut records = Vec::new();
        let mut next_cursor = since;
        let mut page = 1u32;

        'pages: loop {
            self.pace().await;
            let (entries, total_pages) =
                api::get_diary_page(&self.client, &token, &self.username, page).await?;

            for entry in entries {
                let added_at = parse_diary_date(&entry.date_added)?;
                // Diary pages are newest-first; past the cursor means done
                if let Some(since) = since {
                    if added_at < since {
                        break 'pages;
                    }
                }

                let watched_at = match entry.backdate.as_deref() {
                    Some(backdate) => parse_diary_date(backdate)?,
                    None => added_at,
                };
                let season = self.season_number(entry.show_id, entry.season_id).await?;
                let season = match season {
                    Some(s) => s,
                    None => {
                        debug!(
                            show_id = entry.show_id,
                            season_id = entry.season_id,
                            "diary entry references unknown season, skipping"
                        );
                        continue;
                    }
                };

                if next_cursor.map_or(true, |c| added_at > c) {
                    next_cursor = Some(added_at);
                }
                records.push(RawWatchRecord {
                    origin: Service::Serializd,
                    tmdb_id: Some(entry.show_id),
                    season: Some(season),
                    episode: Some(entry.episode_number),
                    title: entry.show_name,
                    watched_at,
                    // 0 means unrated; the normalizer maps it to None
                    native_rating: Some(entry.rating),
                    last_modified: added_at,
                    native_id: Some(entry.id),
                });
            }

            if page >= total_pages {
                break;
            }
            page += 1;
        }

        debug!(count = records.len(), "fetched serializd diary");
        Ok(HistoryPage {
            records,
            next_cursor,
        })
    }

    async fn fetch_show_ratings(&self) -> Result<Vec<RawShowRating>, ServiceError> {
        // Serializd ratings always hang off a diary or review row, so there
        // is no separate show-rating feed to reconcile.
        Ok(Vec::new())
    }

    async fn create_watch_event(&self, event: &WatchEvent) -> Result<Option<u64>, ServiceError> {
        let (show_id, season, episode) = Self::episode_parts(event)?;
        let season_id = self.season_id(show_id, season).await?;

        self.pace().await;
        let token = self.token()?;
        api::add_episode_log(
            &self.client,
            token,
            show_id,
            season_id,
            episode,
            event.watched_at.date_naive(),
        )
        .await?;

        if let Some(rating) = event.rating {
            self.pace().await;
            api::add_rating_review(
                &self.client,
                token,
                show_id,
                season_id,
                rating,
                event.watched_at,
            )
            .await?;
        }
        // The diary row id only shows up on the next fetch
        Ok(None)
    }

    async fn update_rating(
        &self,
        event: &WatchEvent,
        _native_id: Option<u64>,
        rating: Option<u8>,
    ) -> Result<(), ServiceError> {
        let (show_id, season, _) = Self::episode_parts(event)?;
        let season_id = self.season_id(show_id, season).await?;

        self.pace().await;
        let token = self.token()?;
        // There is no dedicated edit endpoint; re-submitting replaces the
        // rating, and 0 clears it.
        api::add_rating_review(
            &self.client,
            token,
            show_id,
            season_id,
            rating.unwrap_or(0),
            event.watched_at,
        )
        .await
    }

    async fn update_timestamp(
        &self,
        event: &WatchEvent,
        _native_id: Option<u64>,
        watched_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let (show_id, season, episode) = Self::episode_parts(event)?;
        let season_id = self.season_id(show_id, season).await?;

        self.pace().await;
        let token = self.token()?;
        api::add_episode_log(
            &self.client,
            token,
            show_id,
            season_id,
            episode,
            watched_at.date_naive(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_diary_date_variants() {
        assert!(parse_diary_date("2024-03-01T10:30:00Z").is_ok());
        assert!(parse_diary_date("2024-03-01T10:30:00.123").is_ok());
        assert!(parse_diary_date("2024-03-01").is_ok());
        assert!(parse_diary_date("yesterday").is_err());
    }

    #[test]
    fn test_bare_date_is_midnight_utc() {
        let dt = parse_diary_date("2024-03-01").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }
}
