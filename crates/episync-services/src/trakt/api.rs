use crate::error::{retry_after_secs, status_error, ServiceError};
use crate::traits::{RawShowRating, RawWatchRecord};
use chrono::{DateTime, Utc};
use episync_models::{ItemKey, Service};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::{debug, warn};

const API_BASE: &str = "https://api.trakt.tv";
const PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct TraktIds {
    pub trakt: Option<u64>,
    pub tmdb: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TraktShow {
    title: String,
    ids: TraktIds,
}

#[derive(Debug, Deserialize)]
struct TraktMovie {
    title: String,
    ids: TraktIds,
}

#[derive(Debug, Deserialize)]
struct TraktEpisode {
    season: u32,
    number: u32,
}

#[derive(Debug, Deserialize)]
struct TraktHistoryItem {
    id: u64,
    watched_at: String,
    #[serde(rename = "type")]
    item_type: String,
    movie: Option<TraktMovie>,
    show: Option<TraktShow>,
    episode: Option<TraktEpisode>,
}

#[derive(Debug, Deserialize)]
struct TraktRatingItem {
    rated_at: String,
    rating: u8,
    #[serde(rename = "type")]
    item_type: String,
    movie: Option<TraktMovie>,
    show: Option<TraktShow>,
    episode: Option<TraktEpisode>,
}

fn with_trakt_headers(builder: RequestBuilder, access_token: &str, client_id: &str) -> RequestBuilder {
    builder
        .header("Authorization", format!("Bearer {}", access_token))
        .header("trakt-api-version", "2")
        .header("trakt-api-key", client_id)
        .header("Accept", "application/json")
        .header("Content-Type", "application/json")
}

async fn check(response: Response, context: &str) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = retry_after_secs(&response);
    Err(status_error(status, retry_after, context))
}

fn parse_timestamp(s: &str, context: &str) -> Result<DateTime<Utc>, ServiceError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ServiceError::Protocol(format!("{}: bad timestamp '{}': {}", context, s, e)))
}

/// A rating from /sync/ratings joined onto history records by item key.
#[derive(Debug, Clone)]
pub struct EpisodeRating {
    pub item: ItemKey,
    pub rating: u8,
    pub rated_at: DateTime<Utc>,
}

/// Fetch the full (or incremental, when `start_at` is set) watch history.
/// Trakt paginates; the page count comes back in X-Pagination-Page-Count.
pub async fn get_watch_history(
    client: &Client,
    access_token: &str,
    client_id: &str,
    username: &str,
    start_at: Option<DateTime<Utc>>,
) -> Result<Vec<RawWatchRecord>, ServiceError> {
    let mut records = Vec::new();
    let mut page = 1u32;
    let mut page_count = 1u32;

    while page <= page_count {
        let mut url = format!(
            "{}/users/{}/history?page={}&limit={}",
            API_BASE, username, page, PAGE_LIMIT
        );
        if let Some(start) = start_at {
            url.push_str(&format!("&start_at={}", start.to_rfc3339()));
        }

        let response = with_trakt_headers(client.get(&url), access_token, client_id)
            .send()
            .await
            .map_err(ServiceError::from_transport)?;
        let response = check(response, "trakt history").await?;

        if let Some(count) = response
            .headers()
            .get("X-Pagination-Page-Count")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
        {
            page_count = count;
        }

        let items: Vec<TraktHistoryItem> = response
            .json()
            .await
            .map_err(ServiceError::from_transport)?;

        for item in items {
            let watched_at = parse_timestamp(&item.watched_at, "trakt history")?;
            let (tmdb_id, season, episode, title) = match item.item_type.as_str() {
                "movie" => {
                    let movie = match item.movie.as_ref() {
                        Some(m) => m,
                        None => continue,
                    };
                    (movie.ids.tmdb, None, None, Some(movie.title.clone()))
                }
                "episode" => {
                    let show = match item.show.as_ref() {
                        Some(s) => s,
                        None => continue,
                    };
                    let ep = match item.episode.as_ref() {
                        Some(e) => e,
                        None => continue,
                    };
                    (
                        show.ids.tmdb,
                        Some(ep.season),
                        Some(ep.number),
                        Some(show.title.clone()),
                    )
                }
                other => {
                    debug!(item_type = other, "skipping unrecognized history item type");
                    continue;
                }
            };

            records.push(RawWatchRecord {
                origin: Service::Trakt,
                tmdb_id,
                season,
                episode,
                title,
                watched_at,
                native_rating: None,
                // History rows carry no modification time of their own
                last_modified: watched_at,
                native_id: Some(item.id),
            });
        }

        page += 1;
    }

    debug!(count = records.len(), "fetched trakt watch history");
    Ok(records)
}

/// Per-episode and per-movie ratings, for joining onto history records.
pub async fn get_item_ratings(
    client: &Client,
    access_token: &str,
    client_id: &str,
) -> Result<Vec<EpisodeRating>, ServiceError> {
    let mut ratings = Vec::new();
    for endpoint in ["/sync/ratings/episodes", "/sync/ratings/movies"] {
        let url = format!("{}{}", API_BASE, endpoint);
        let response = with_trakt_headers(client.get(&url), access_token, client_id)
            .send()
            .await
            .map_err(ServiceError::from_transport)?;
        let response = check(response, "trakt ratings").await?;
        let items: Vec<TraktRatingItem> = response
            .json()
            .await
            .map_err(ServiceError::from_transport)?;

        for item in items {
            let rated_at = parse_timestamp(&item.rated_at, "trakt ratings")?;
            let key = match item.item_type.as_str() {
                "movie" => item
                    .movie
                    .as_ref()
                    .and_then(|m| m.ids.tmdb)
                    .map(|tmdb_id| ItemKey::Movie { tmdb_id }),
                "episode" => {
                    let show = item.show.as_ref();
                    let ep = item.episode.as_ref();
                    match (show, ep) {
                        (Some(show), Some(ep)) => {
                            show.ids.tmdb.map(|tmdb_show_id| ItemKey::Episode {
                                tmdb_show_id,
                                season: ep.season,
                                episode: ep.number,
                            })
                        }
                        _ => None,
                    }
                }
                _ => None,
            };
            match key {
                Some(item_key) => ratings.push(EpisodeRating {
                    item: item_key,
                    rating: item.rating,
                    rated_at,
                }),
                None => warn!("rating item without usable TMDB id, skipping"),
            }
        }
    }
    Ok(ratings)
}

/// Show-level ratings, which have no episode rows behind them.
pub async fn get_show_ratings(
    client: &Client,
    access_token: &str,
    client_id: &str,
) -> Result<Vec<RawShowRating>, ServiceError> {
    let url = format!("{}/sync/ratings/shows", API_BASE);
    let response = with_trakt_headers(client.get(&url), access_token, client_id)
        .send()
        .await
        .map_err(ServiceError::from_transport)?;
    let response = check(response, "trakt show ratings").await?;
    let items: Vec<TraktRatingItem> = response
        .json()
        .await
        .map_err(ServiceError::from_transport)?;

    let mut ratings = Vec::new();
    for item in items {
        let show = match item.show.as_ref() {
            Some(s) => s,
            None => continue,
        };
        ratings.push(RawShowRating {
            origin: Service::Trakt,
            tmdb_show_id: show.ids.tmdb,
            title: Some(show.title.clone()),
            native_rating: item.rating,
            last_modified: parse_timestamp(&item.rated_at, "trakt show ratings")?,
        });
    }
    Ok(ratings)
}

fn history_payload(item: ItemKey, watched_at: DateTime<Utc>) -> serde_json::Value {
    match item {
        ItemKey::Movie { tmdb_id } => serde_json::json!({
            "movies": [{
                "ids": { "tmdb": tmdb_id },
                "watched_at": watched_at.to_rfc3339(),
            }]
        }),
        ItemKey::Episode {
            tmdb_show_id,
            season,
            episode,
        } => serde_json::json!({
            "shows": [{
                "ids": { "tmdb": tmdb_show_id },
                "seasons": [{
                    "number": season,
                    "episodes": [{
                        "number": episode,
                        "watched_at": watched_at.to_rfc3339(),
                    }]
                }]
            }]
        }),
    }
}

/// Add a single watch to history. Trakt does not echo back the new history
/// row id, so the caller gets `None` and picks the id up on the next fetch.
pub async fn add_watch(
    client: &Client,
    access_token: &str,
    client_id: &str,
    item: ItemKey,
    watched_at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let url = format!("{}/sync/history", API_BASE);
    let payload = history_payload(item, watched_at);
    let response = with_trakt_headers(client.post(&url), access_token, client_id)
        .json(&payload)
        .send()
        .await
        .map_err(ServiceError::from_transport)?;
    check(response, "trakt add history").await?;
    Ok(())
}

/// Remove history rows by their native ids.
pub async fn remove_watches(
    client: &Client,
    access_token: &str,
    client_id: &str,
    history_ids: &[u64],
) -> Result<(), ServiceError> {
    let url = format!("{}/sync/history/remove", API_BASE);
    let payload = serde_json::json!({ "ids": history_ids });
    let response = with_trakt_headers(client.post(&url), access_token, client_id)
        .json(&payload)
        .send()
        .await
        .map_err(ServiceError::from_transport)?;
    check(response, "trakt remove history").await?;
    Ok(())
}

fn rating_payload(item: ItemKey, rating: Option<u8>) -> serde_json::Value {
    match item {
        ItemKey::Movie { tmdb_id } => {
            let mut movie = serde_json::json!({ "ids": { "tmdb": tmdb_id } });
            if let Some(r) = rating {
                movie["rating"] = serde_json::json!(r);
            }
            serde_json::json!({ "movies": [movie] })
        }
        ItemKey::Episode {
            tmdb_show_id,
            season,
            episode,
        } => {
            let mut ep = serde_json::json!({ "number": episode });
            if let Some(r) = rating {
                ep["rating"] = serde_json::json!(r);
            }
            serde_json::json!({
                "shows": [{
                    "ids": { "tmdb": tmdb_show_id },
                    "seasons": [{ "number": season, "episodes": [ep] }]
                }]
            })
        }
    }
}

/// Set or clear a rating. `None` removes any existing rating.
pub async fn set_rating(
    client: &Client,
    access_token: &str,
    client_id: &str,
    item: ItemKey,
    rating: Option<u8>,
) -> Result<(), ServiceError> {
    let (url, payload) = match rating {
        Some(_) => (format!("{}/sync/ratings", API_BASE), rating_payload(item, rating)),
        None => (
            format!("{}/sync/ratings/remove", API_BASE),
            rating_payload(item, None),
        ),
    };
    let response = with_trakt_headers(client.post(&url), access_token, client_id)
        .json(&payload)
        .send()
        .await
        .map_err(ServiceError::from_transport)?;
    check(response, "trakt set rating").await?;
    Ok(())
}
