use crate::error::{retry_after_secs, status_error, ServiceError};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;

const API_BASE: &str = "https://www.serializd.com/api";
const AUTH_COOKIE: &str = "tvproject_credentials";

fn with_serializd_headers(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    let builder = builder
        .header("Accept", "application/json")
        .header("Content-Type", "application/json")
        .header("X-Requested-With", "serializd_vercel");
    match token {
        Some(token) => builder.header("Cookie", format!("{}={}", AUTH_COOKIE, token)),
        None => builder,
    }
}

async fn check(response: Response, context: &str) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = retry_after_secs(&response);
    Err(status_error(status, retry_after, context))
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

pub async fn login(client: &Client, email: &str, password: &str) -> Result<String, ServiceError> {
    let payload = serde_json::json!({ "email": email, "password": password });
    let response = with_serializd_headers(
        client.post(format!("{}/login", API_BASE)),
        None,
    )
    .json(&payload)
    .send()
    .await
    .map_err(ServiceError::from_transport)?;
    let response = check(response, "serializd login").await?;
    let login: LoginResponse = response
        .json()
        .await
        .map_err(ServiceError::from_transport)?;
    Ok(login.token)
}

pub async fn validate_token(client: &Client, token: &str) -> Result<bool, ServiceError> {
    let response = with_serializd_headers(
        client.post(format!("{}/validateauthtoken", API_BASE)),
        Some(token),
    )
    .send()
    .await
    .map_err(ServiceError::from_transport)?;
    Ok(response.status().is_success())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryEntry {
    pub id: u64,
    pub show_id: u64,
    pub show_name: Option<String>,
    pub season_id: u64,
    pub episode_number: u32,
    pub date_added: String,
    #[serde(default)]
    pub rating: u8,
    #[serde(default)]
    pub backdate: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiaryPage {
    reviews: Vec<DiaryEntry>,
    total_pages: u32,
}

/// Fetch one diary page. Pages are 1-based; `total_pages` tells the caller
/// when to stop.
pub async fn get_diary_page(
    client: &Client,
    token: &str,
    username: &str,
    page: u32,
) -> Result<(Vec<DiaryEntry>, u32), ServiceError> {
    let url = format!("{}/user/{}/diary?page={}", API_BASE, username, page);
    let response = with_serializd_headers(client.get(&url), Some(token))
        .send()
        .await
        .map_err(ServiceError::from_transport)?;
    let response = check(response, "serializd diary").await?;
    let diary: DiaryPage = response
        .json()
        .await
        .map_err(ServiceError::from_transport)?;
    Ok((diary.reviews, diary.total_pages))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonInfo {
    pub id: u64,
    pub season_number: u32,
}

#[derive(Debug, Deserialize)]
struct ShowResponse {
    seasons: Vec<SeasonInfo>,
}

/// Season list for a show: the mapping between public season numbers and
/// Serializd's internal season ids.
pub async fn get_show_seasons(
    client: &Client,
    token: &str,
    show_id: u64,
) -> Result<Vec<SeasonInfo>, ServiceError> {
    let url = format!("{}/show/{}", API_BASE, show_id);
    let response = with_serializd_headers(client.get(&url), Some(token))
        .send()
        .await
        .map_err(ServiceError::from_transport)?;
    let response = check(response, "serializd show").await?;
    let show: ShowResponse = response
        .json()
        .await
        .map_err(ServiceError::from_transport)?;
    Ok(show.seasons)
}

/// Log one episode watch, backdated to `date`.
pub async fn add_episode_log(
    client: &Client,
    token: &str,
    show_id: u64,
    season_id: u64,
    episode_number: u32,
    date: NaiveDate,
) -> Result<(), ServiceError> {
    let payload = serde_json::json!({
        "showId": show_id,
        "seasonId": season_id,
        "episodeNumber": episode_number,
        "date": date.format("%Y-%m-%d").to_string(),
    });
    let response = with_serializd_headers(
        client.post(format!("{}/episode_log/add", API_BASE)),
        Some(token),
    )
    .json(&payload)
    .send()
    .await
    .map_err(ServiceError::from_transport)?;
    check(response, "serializd episode log").await?;
    Ok(())
}

/// Submit a rating as a blank backdated review. Rating 0 clears it.
pub async fn add_rating_review(
    client: &Client,
    token: &str,
    show_id: u64,
    season_id: u64,
    rating: u8,
    backdate: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let payload = serde_json::json!({
        "showId": show_id,
        "seasonId": season_id,
        "reviewText": "",
        "rating": rating,
        "backdate": backdate.format("%Y-%m-%d").to_string(),
    });
    let response = with_serializd_headers(
        client.post(format!("{}/show/reviews/add", API_BASE)),
        Some(token),
    )
    .json(&payload)
    .send()
    .await
    .map_err(ServiceError::from_transport)?;
    check(response, "serializd rating").await?;
    Ok(())
}
