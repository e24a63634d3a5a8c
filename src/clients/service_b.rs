//! Client B: wraps a synchronous library (spec §4.3, §9). Every call is
//! routed through `spawn_blocking` so the synchronous client never runs
//! on the scheduler's cooperative thread.
//!
//! Grounded on `original_source/sync/yandex.py`'s `asyncio.to_thread`
//! wrapping; the teacher pack has no synchronous-library client of its
//! own, so the `spawn_blocking`-per-call idiom is the direct Rust
//! equivalent. `reqwest::blocking` stands in for the synchronous SDK
//! this client wraps — it is driven only from inside blocking closures.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{NullSession, Service as ClientService, ServiceClient, Session};
use crate::config::ServiceBCredentials;
use crate::error::{Result, SyncError};
use crate::matcher::RemoteTrack;
use crate::store::Service;

const API_BASE: &str = "https://service-b.example.com/api";
const BATCH_SIZE: usize = 100;

/// The blocking inner client. Stands in for a vendored synchronous SDK;
/// every method here runs on a `spawn_blocking` worker thread only.
struct BlockingInner {
    http: reqwest::blocking::Client,
    token: String,
}

impl BlockingInner {
    fn connect(token: String) -> std::result::Result<Self, anyhow::Error> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, token })
    }

    fn liked_tracks(&self, since: Option<DateTime<Utc>>) -> std::result::Result<Vec<RemoteTrack>, anyhow::Error> {
        #[derive(Deserialize)]
        struct LikedResponse {
            tracks: Vec<TrackEntry>,
        }
        #[derive(Deserialize)]
        struct TrackEntry {
            id: String,
            title: String,
            artists: Vec<ArtistEntry>,
            duration_ms: Option<i64>,
            timestamp: Option<DateTime<Utc>>,
        }
        #[derive(Deserialize)]
        struct ArtistEntry {
            name: String,
        }

        let resp = self
            .http
            .get(format!("{API_BASE}/users/likes/tracks"))
            .bearer_auth(&self.token)
            .send()?
            .error_for_status()?;
        let parsed: LikedResponse = resp.json()?;

        let mut out = Vec::new();
        for entry in parsed.tracks {
            if let (Some(since), Some(ts)) = (since, entry.timestamp) {
                if ts < since {
                    continue;
                }
            }
            out.push(RemoteTrack {
                service: "service_b",
                remote_id: entry.id,
                artist: entry
                    .artists
                    .first()
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                title: entry.title,
                added_at: entry.timestamp.map(|t| t.to_rfc3339()),
                duration_ms: entry.duration_ms,
            });
        }
        Ok(out)
    }

    fn like(&self, ids: &[String]) -> std::result::Result<(), anyhow::Error> {
        if ids.is_empty() {
            return Ok(());
        }
        self.http
            .post(format!("{API_BASE}/users/likes/tracks/add"))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "track_ids": ids }))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn unlike(&self, ids: &[String]) -> std::result::Result<(), anyhow::Error> {
        if ids.is_empty() {
            return Ok(());
        }
        self.http
            .post(format!("{API_BASE}/users/likes/tracks/remove"))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "track_ids": ids }))
            .send()?
            .error_for_status()?;
        Ok(())
    }

    fn search(&self, artist: &str, title: &str) -> std::result::Result<Option<RemoteTrack>, anyhow::Error> {
        #[derive(Deserialize)]
        struct SearchResponse {
            best: Option<BestResult>,
        }
        #[derive(Deserialize)]
        struct BestResult {
            result_type: String,
            result: TrackEntry,
        }
        #[derive(Deserialize)]
        struct TrackEntry {
            id: String,
            title: String,
            artists: Vec<ArtistEntry>,
            duration_ms: Option<i64>,
        }
        #[derive(Deserialize)]
        struct ArtistEntry {
            name: String,
        }

        let query = format!("{artist} {title}");
        let resp = self
            .http
            .get(format!("{API_BASE}/search"))
            .bearer_auth(&self.token)
            .query(&[("text", query.as_str())])
            .send()?
            .error_for_status()?;
        let parsed: SearchResponse = resp.json()?;

        Ok(parsed.best.and_then(|best| {
            (best.result_type == "track").then(|| RemoteTrack {
                service: "service_b",
                remote_id: best.result.id,
                artist: best
                    .result
                    .artists
                    .first()
                    .map(|a| a.name.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
                title: best.result.title,
                added_at: None,
                duration_ms: best.result.duration_ms,
            })
        }))
    }
}

pub struct ServiceBClient {
    credentials: ServiceBCredentials,
    inner: Mutex<Option<Arc<BlockingInner>>>,
}

impl ServiceBClient {
    pub fn new(credentials: ServiceBCredentials) -> Self {
        Self {
            credentials,
            inner: Mutex::new(None),
        }
    }

    async fn inner(&self) -> Result<Arc<BlockingInner>> {
        if let Some(inner) = self.inner.lock().expect("inner mutex poisoned").clone() {
            return Ok(inner);
        }

        let token = self.credentials.token.clone();
        let connected = tokio::task::spawn_blocking(move || BlockingInner::connect(token))
            .await
            .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?
            .map_err(|e| SyncError::Auth {
                service: "service_b",
                detail: e.to_string(),
                config_key: "service_b.token",
            })?;

        let connected = Arc::new(connected);
        *self.inner.lock().expect("inner mutex poisoned") = Some(connected.clone());
        Ok(connected)
    }
}

#[async_trait]
impl ServiceClient for ServiceBClient {
    fn service(&self) -> ClientService {
        Service::B
    }

    async fn open_session(&self) -> Result<Box<dyn Session>> {
        self.inner().await?;
        Ok(Box::new(NullSession))
    }

    async fn fetch_liked(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteTrack>> {
        let inner = self.inner().await?;
        tokio::task::spawn_blocking(move || inner.liked_tracks(since))
            .await
            .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?
            .map_err(|e| api_error(e))
    }

    async fn like(&self, remote_ids: &[String]) -> Result<()> {
        let inner = self.inner().await?;
        for batch in remote_ids.chunks(BATCH_SIZE) {
            let batch = batch.to_vec();
            let inner = inner.clone();
            tokio::task::spawn_blocking(move || inner.like(&batch))
                .await
                .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?
                .map_err(api_error)?;
        }
        Ok(())
    }

    async fn unlike(&self, remote_ids: &[String]) -> Result<()> {
        let inner = self.inner().await?;
        for batch in remote_ids.chunks(BATCH_SIZE) {
            let batch = batch.to_vec();
            let inner = inner.clone();
            tokio::task::spawn_blocking(move || inner.unlike(&batch))
                .await
                .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?
                .map_err(api_error)?;
        }
        Ok(())
    }

    async fn search(&self, artist: &str, title: &str) -> Result<Option<RemoteTrack>> {
        let inner = self.inner().await?;
        let artist = artist.to_string();
        let title = title.to_string();
        tokio::task::spawn_blocking(move || inner.search(&artist, &title))
            .await
            .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?
            .map_err(api_error)
    }
}

fn api_error(err: anyhow::Error) -> SyncError {
    SyncError::Network {
        service: "service_b",
        source: err,
    }
}
