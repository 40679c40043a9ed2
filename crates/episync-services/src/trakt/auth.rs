use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration as StdDuration;
use tracing::info;

const REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";
const TOKEN_URL: &str = "https://api.trakt.tv/oauth/token";
const DEVICE_CODE_URL: &str = "https://api.trakt.tv/oauth/device/code";
const DEVICE_TOKEN_URL: &str = "https://api.trakt.tv/oauth/device/token";

/// Create a reqwest Client with browser-like headers to bypass Cloudflare
pub fn create_trakt_client() -> Client {
    Client::builder()
        .user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
        .timeout(StdDuration::from_secs(30))
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
}

#[derive(Debug)]
pub struct TokenInfo {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_url: String,
    expires_in: u64,
    interval: u64,
}

pub async fn authenticate(
    client_id: &str,
    client_secret: &str,
    refresh_token: Option<&str>,
) -> Result<TokenInfo> {
    let client = create_trakt_client();

    if let Some(refresh_token) = refresh_token {
        // Try to refresh the token
        match refresh_access_token(&client, client_id, client_secret, refresh_token).await {
            Ok(token_info) => return Ok(token_info),
            Err(_) => {
                // Refresh failed, fall through to the device flow
            }
        }
    }

    device_flow(&client, client_id, client_secret).await
}

async fn refresh_access_token(
    client: &Client,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<TokenInfo> {
    let payload = serde_json::json!({
        "refresh_token": refresh_token,
        "client_id": client_id,
        "client_secret": client_secret,
        "redirect_uri": REDIRECT_URI,
        "grant_type": "refresh_token"
    });

    let response = client
        .post(TOKEN_URL)
        .json(&payload)
        .header("Accept", "application/json")
        .header("Content-Type", "application/json")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(anyhow!("Token refresh failed: {}", response.status()));
    }

    let token_response: TokenResponse = response.json().await?;
    Ok(token_info_from(token_response))
}

/// OAuth device flow: show a short code, poll the token endpoint at the
/// server-provided interval until the user approves or the code expires.
async fn device_flow(client: &Client, client_id: &str, client_secret: &str) -> Result<TokenInfo> {
    let response = client
        .post(DEVICE_CODE_URL)
        .json(&serde_json::json!({ "client_id": client_id }))
        .header("Accept", "application/json")
        .header("Content-Type", "application/json")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to request device code: {}",
            response.status()
        ));
    }

    let device: DeviceCodeResponse = response.json().await?;

    println!("\nTo authorize this application, visit:");
    println!("  {}", device.verification_url);
    println!("and enter the code: {}\n", device.user_code);

    let deadline = Utc::now() + Duration::seconds(device.expires_in as i64);
    let mut interval = device.interval.max(1);

    loop {
        if Utc::now() > deadline {
            return Err(anyhow!("Device code expired before authorization"));
        }
        tokio::time::sleep(StdDuration::from_secs(interval)).await;

        let payload = serde_json::json!({
            "code": device.device_code,
            "client_id": client_id,
            "client_secret": client_secret,
        });
        let response = client
            .post(DEVICE_TOKEN_URL)
            .json(&payload)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {
                let token_response: TokenResponse = response.json().await?;
                info!("Trakt device authorization completed");
                return Ok(token_info_from(token_response));
            }
            // Pending: the user has not entered the code yet
            400 => continue,
            404 => return Err(anyhow!("Invalid device code")),
            409 => return Err(anyhow!("Device code already approved")),
            410 => return Err(anyhow!("Device code expired")),
            418 => return Err(anyhow!("Authorization was denied")),
            429 => {
                // Polling too fast, back off as instructed
                interval += 1;
                continue;
            }
            other => return Err(anyhow!("Unexpected device token response: HTTP {}", other)),
        }
    }
}

fn token_info_from(token_response: TokenResponse) -> TokenInfo {
    // Shave two minutes off the lifetime so we refresh before the edge
    let expires_at = Utc::now() + Duration::seconds(token_response.expires_in as i64 - 120);
    TokenInfo {
        access_token: token_response.access_token,
        refresh_token: token_response.refresh_token,
        expires_at,
    }
}
