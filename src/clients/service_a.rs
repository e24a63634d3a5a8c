//! Client A: a token-refresh style HTTP/JSON service client (spec §4.3).
//!
//! Grounded on `services/catalog_sync/spotify.rs`'s `ensure_token` /
//! `api_request` 401-retry-once shape for the Rust-idiom scaffolding;
//! the exact refresh-grant flow, retry counts, and batch size are
//! grounded on `original_source/sync/spotify.py`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio::time::sleep;

use super::{NullSession, Service as ClientService, ServiceClient, Session};
use crate::config::ServiceACredentials;
use crate::error::{Result, SyncError};
use crate::matcher::RemoteTrack;
use crate::store::Service;

const API_BASE: &str = "https://service-a.example.com/v1";
const TOKEN_URL: &str = "https://service-a.example.com/oauth/token";
const BATCH_SIZE: usize = 50;
const SEARCH_LIMIT: u32 = 10;
const MAX_NETWORK_RETRIES: u32 = 3;
const TOKEN_EXPIRY_SLACK_SECS: i64 = 60;

struct TokenState {
    access_token: Option<String>,
    expires_at: DateTime<Utc>,
}

pub struct ServiceAClient {
    http: Client,
    credentials: ServiceACredentials,
    token: RwLock<TokenState>,
}

impl ServiceAClient {
    pub fn new(credentials: ServiceACredentials) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with static config"),
            credentials,
            token: RwLock::new(TokenState {
                access_token: None,
                expires_at: DateTime::<Utc>::MIN_UTC,
            }),
        }
    }

    /// Ensure an access token with >= 60s remaining, exchanging the
    /// stored refresh credential otherwise (spec §4.3). `force` bypasses
    /// the cached token even if unexpired, used on the 401 retry path.
    async fn ensure_token(&self, force: bool) -> Result<String> {
        if !force {
            let state = self.token.read().await;
            if let Some(token) = &state.access_token {
                if state.expires_at - Utc::now() > chrono::Duration::seconds(TOKEN_EXPIRY_SLACK_SECS)
                {
                    return Ok(token.clone());
                }
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }

        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &self.credentials.refresh_token),
                ("client_id", &self.credentials.client_id),
                ("client_secret", &self.credentials.client_secret),
            ])
            .send()
            .await
            .map_err(|e| network_error(e))?;

        if !resp.status().is_success() {
            return Err(SyncError::Auth {
                service: "service_a",
                detail: format!("token refresh returned {}", resp.status()),
                config_key: "service_a.refresh_token",
            });
        }

        let parsed: TokenResponse = resp.json().await.map_err(|e| network_error(e))?;
        let expires_at = Utc::now() + chrono::Duration::seconds(parsed.expires_in);

        let mut state = self.token.write().await;
        state.access_token = Some(parsed.access_token.clone());
        state.expires_at = expires_at;
        Ok(parsed.access_token)
    }

    /// Issue one authenticated request, handling the 401-retry-once,
    /// 429-honour-Retry-After, and network-error-with-backoff policies
    /// of spec §4.3 in one place.
    async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let mut unauthorized_retried = false;

        for attempt in 0..MAX_NETWORK_RETRIES {
            let token = self.ensure_token(false).await?;
            let mut req = self.http.request(method.clone(), url).bearer_auth(&token);
            if let Some(body) = &body {
                req = req.json(body);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(err) => {
                    if attempt + 1 >= MAX_NETWORK_RETRIES {
                        return Err(network_error(err));
                    }
                    let backoff = 2u64.pow(attempt);
                    tracing::warn!(attempt, backoff, "service_a network error, retrying");
                    sleep(Duration::from_secs(backoff)).await;
                    continue;
                }
            };

            match resp.status() {
                StatusCode::UNAUTHORIZED if !unauthorized_retried => {
                    unauthorized_retried = true;
                    self.ensure_token(true).await?;
                    continue;
                }
                StatusCode::UNAUTHORIZED => {
                    return Err(SyncError::Auth {
                        service: "service_a",
                        detail: "rejected after forced token refresh".to_string(),
                        config_key: "service_a.refresh_token",
                    });
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = resp
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(1);
                    sleep(Duration::from_secs(retry_after)).await;
                    continue;
                }
                status if status.is_success() => return Ok(resp),
                status => {
                    return Err(SyncError::Network {
                        service: "service_a",
                        source: anyhow::anyhow!("unexpected status {status}"),
                    });
                }
            }
        }

        Err(SyncError::Network {
            service: "service_a",
            source: anyhow::anyhow!("exhausted retries"),
        })
    }
}

fn network_error(err: reqwest::Error) -> SyncError {
    SyncError::Network {
        service: "service_a",
        source: anyhow::Error::new(err),
    }
}

#[derive(Deserialize)]
struct LikedPage {
    items: Vec<LikedItem>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct LikedItem {
    track: TrackPayload,
    added_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct TrackPayload {
    id: String,
    name: String,
    artists: Vec<ArtistPayload>,
    duration_ms: Option<i64>,
}

#[derive(Deserialize)]
struct ArtistPayload {
    name: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Deserialize)]
struct SearchTracks {
    items: Vec<TrackPayload>,
}

fn to_remote_track(track: TrackPayload, added_at: Option<DateTime<Utc>>) -> RemoteTrack {
    RemoteTrack {
        service: "service_a",
        remote_id: track.id,
        artist: track
            .artists
            .first()
            .map(|a| a.name.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        title: track.name,
        added_at: added_at.map(|dt| dt.to_rfc3339()),
        duration_ms: track.duration_ms,
    }
}

#[async_trait]
impl ServiceClient for ServiceAClient {
    fn service(&self) -> ClientService {
        Service::A
    }

    async fn open_session(&self) -> Result<Box<dyn Session>> {
        self.ensure_token(false).await?;
        Ok(Box::new(NullSession))
    }

    async fn fetch_liked(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteTrack>> {
        let mut tracks = Vec::new();
        let mut url = format!("{API_BASE}/me/tracks?limit=50&offset=0");

        loop {
            let resp = self.request(reqwest::Method::GET, &url, None).await?;
            let page: LikedPage = resp.json().await.map_err(network_error)?;

            if page.items.is_empty() {
                break;
            }

            let mut stop_paging = false;
            for item in page.items {
                if let (Some(since), Some(added_at)) = (since, item.added_at) {
                    if added_at < since {
                        stop_paging = true;
                        break;
                    }
                }
                tracks.push(to_remote_track(item.track, item.added_at));
            }

            if stop_paging {
                break;
            }
            match page.next {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(tracks)
    }

    async fn like(&self, remote_ids: &[String]) -> Result<()> {
        for batch in remote_ids.chunks(BATCH_SIZE) {
            self.request(
                reqwest::Method::PUT,
                &format!("{API_BASE}/me/tracks"),
                Some(serde_json::json!({ "ids": batch })),
            )
            .await?;
        }
        Ok(())
    }

    async fn unlike(&self, remote_ids: &[String]) -> Result<()> {
        for batch in remote_ids.chunks(BATCH_SIZE) {
            self.request(
                reqwest::Method::DELETE,
                &format!("{API_BASE}/me/tracks"),
                Some(serde_json::json!({ "ids": batch })),
            )
            .await?;
        }
        Ok(())
    }

    async fn search(&self, artist: &str, title: &str) -> Result<Option<RemoteTrack>> {
        let query = format!("{artist} {title}");
        let url = format!(
            "{API_BASE}/search?q={}&type=track&limit={SEARCH_LIMIT}",
            urlencoding::encode(&query)
        );
        let resp = self.request(reqwest::Method::GET, &url, None).await?;
        let parsed: SearchResponse = resp.json().await.map_err(network_error)?;

        Ok(parsed
            .tracks
            .items
            .into_iter()
            .next()
            .map(|track| to_remote_track(track, None)))
    }
}
