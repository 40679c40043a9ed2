use crate::error::ServiceError;
use crate::trakt::{api, auth};
use crate::traits::{HistoryPage, RawShowRating, TrackingService};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use episync_config::{CredentialStore, PathManager};
use episync_models::{Service, WatchEvent};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct TraktClient {
    client: Arc<Client>,
    access_token: Option<String>,
    client_id: String,
    client_secret: String,
    username: String,
}

impl TraktClient {
    pub fn new(client_id: String, client_secret: String, username: String) -> Self {
        Self {
            client: Arc::new(auth::create_trakt_client()),
            access_token: None,
            client_id,
            client_secret,
            username,
        }
    }

    fn access_token(&self) -> Result<&str, ServiceError> {
        self.access_token
            .as_deref()
            .ok_or_else(|| ServiceError::AuthExpired("trakt: not authenticated".to_string()))
    }

    async fn do_authenticate(&mut self) -> Result<(), ServiceError> {
        use chrono::Duration;

        let path_manager = PathManager::default();
        let mut cred_store = CredentialStore::new(path_manager.credentials_file());
        cred_store
            .load()
            .map_err(|e| ServiceError::Protocol(format!("credential store: {}", e)))?;

        // Reuse the saved token if it has comfortably more than 5 minutes left
        if let (Some(saved_token), Some(expires_at)) = (
            cred_store.get_trakt_access_token(),
            cred_store.get_trakt_token_expires(),
        ) {
            if expires_at > Utc::now() + Duration::minutes(5) {
                self.access_token = Some(saved_token.clone());
                info!("Using saved Trakt access token (expires at {})", expires_at);
                return Ok(());
            }
            info!(
                "Trakt access token expired or expiring soon (expires at {}), refreshing",
                expires_at
            );
        }

        let refresh_token = cred_store.get_trakt_refresh_token().map(|s| s.as_str());
        let token_info = auth::authenticate(&self.client_id, &self.client_secret, refresh_token)
            .await
            .map_err(|e| ServiceError::AuthExpired(format!("trakt: {}", e)))?;

        self.access_token = Some(token_info.access_token.clone());

        cred_store.set_trakt_access_token(token_info.access_token);
        cred_store.set_trakt_refresh_token(token_info.refresh_token);
        cred_store.set_trakt_token_expires(token_info.expires_at);
        cred_store
            .save()
            .map_err(|e| ServiceError::Protocol(format!("credential store: {}", e)))?;

        info!("Authenticated to Trakt");
        Ok(())
    }
}

#[async_trait]
impl TrackingService for TraktClient {
    fn service(&self) -> Service {
        Service::Trakt
    }

    async fn authenticate(&mut self) -> Result<(), ServiceError> {
        self.do_authenticate().await
    }

    fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    async fn fetch_watch_history(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<HistoryPage, ServiceError> {
        let access_token = self.access_token()?;

        let mut records = api::get_watch_history(
            &self.client,
            access_token,
            &self.client_id,
            &self.username,
            since,
        )
        .await?;

        // Ratings live on a separate endpoint; join them onto every watch of
        // the rated item. A fresh rating also bumps last_modified.
        let ratings = api::get_item_ratings(&self.client, access_token, &self.client_id).await?;
        let by_item: HashMap<_, _> = ratings
            .into_iter()
            .map(|r| (r.item, (r.rating, r.rated_at)))
            .collect();

        for record in &mut records {
            let key = match (record.tmdb_id, record.season, record.episode) {
                (Some(tmdb_show_id), Some(season), Some(episode)) => {
                    episync_models::ItemKey::Episode {
                        tmdb_show_id,
                        season,
                        episode,
                    }
                }
                (Some(tmdb_id), None, None) => episync_models::ItemKey::Movie { tmdb_id },
                _ => continue,
            };
            if let Some((rating, rated_at)) = by_item.get(&key) {
                record.native_rating = Some(*rating);
                if *rated_at > record.last_modified {
                    record.last_modified = *rated_at;
                }
            }
        }

        let next_cursor = records.iter().map(|r| r.watched_at).max().or(since);
        Ok(HistoryPage {
            records,
            next_cursor,
        })
    }

    async fn fetch_show_ratings(&self) -> Result<Vec<RawShowRating>, ServiceError> {
        let access_token = self.access_token()?;
        api::get_show_ratings(&self.client, access_token, &self.client_id).await
    }

    async fn create_watch_event(&self, event: &WatchEvent) -> Result<Option<u64>, ServiceError> {
        let access_token = self.access_token()?;
        api::add_watch(
            &self.client,
            access_token,
            &self.client_id,
            event.item,
            event.watched_at,
        )
        .await?;
        if let Some(rating) = event.rating {
            api::set_rating(
                &self.client,
                access_token,
                &self.client_id,
                event.item,
                Some(rating),
            )
            .await?;
        }
        // Trakt does not echo the new history row id back
        Ok(None)
    }

    async fn update_rating(
        &self,
        event: &WatchEvent,
        _native_id: Option<u64>,
        rating: Option<u8>,
    ) -> Result<(), ServiceError> {
        let access_token = self.access_token()?;
        api::set_rating(&self.client, access_token, &self.client_id, event.item, rating).await
    }

    async fn update_timestamp(
        &self,
        event: &WatchEvent,
        native_id: Option<u64>,
        watched_at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let access_token = self.access_token()?;
        // History rows are immutable on Trakt; replace the row
        if let Some(id) = native_id {
            api::remove_watches(&self.client, access_token, &self.client_id, &[id]).await?;
        }
        api::add_watch(
            &self.client,
            access_token,
            &self.client_id,
            event.item,
            watched_at,
        )
        .await
    }
}
