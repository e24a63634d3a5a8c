//! Shared fixtures for the scenario tests in spec §8: a scriptable
//! `ServiceClient` fake, following the same shape as the per-module
//! fakes inside `engine.rs`'s and `scheduler.rs`'s own `#[cfg(test)]`
//! modules, factored out here since these tests live outside the crate
//! and can only see its public surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use liked_sync_daemon::clients::{NullSession, RemoteTrack, ServiceClient, Session};
use liked_sync_daemon::error::Result;
use liked_sync_daemon::store::Service;
use tokio::sync::Mutex as TokioMutex;

pub struct FakeClient {
    service: Service,
    liked: Vec<RemoteTrack>,
    search_results: TokioMutex<HashMap<String, Option<RemoteTrack>>>,
    pub like_calls: TokioMutex<Vec<Vec<String>>>,
    pub unlike_calls: TokioMutex<Vec<Vec<String>>>,
    pub fetch_liked_calls: AtomicUsize,
}

impl FakeClient {
    pub fn new(service: Service, liked: Vec<RemoteTrack>) -> Self {
        Self {
            service,
            liked,
            search_results: TokioMutex::new(HashMap::new()),
            like_calls: TokioMutex::new(Vec::new()),
            unlike_calls: TokioMutex::new(Vec::new()),
            fetch_liked_calls: AtomicUsize::new(0),
        }
    }

    pub async fn with_search(self, artist: &str, title: &str, result: Option<RemoteTrack>) -> Self {
        self.search_results
            .lock()
            .await
            .insert(format!("{artist}|||{title}"), result);
        self
    }
}

#[async_trait]
impl ServiceClient for FakeClient {
    fn service(&self) -> Service {
        self.service
    }

    async fn open_session(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(NullSession))
    }

    async fn fetch_liked(&self, _since: Option<DateTime<Utc>>) -> Result<Vec<RemoteTrack>> {
        self.fetch_liked_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.liked.clone())
    }

    async fn like(&self, remote_ids: &[String]) -> Result<()> {
        self.like_calls.lock().await.push(remote_ids.to_vec());
        Ok(())
    }

    async fn unlike(&self, remote_ids: &[String]) -> Result<()> {
        self.unlike_calls.lock().await.push(remote_ids.to_vec());
        Ok(())
    }

    async fn search(&self, artist: &str, title: &str) -> Result<Option<RemoteTrack>> {
        Ok(self
            .search_results
            .lock()
            .await
            .get(&format!("{artist}|||{title}"))
            .cloned()
            .flatten())
    }
}

pub fn track(service: &'static str, id: &str, artist: &str, title: &str) -> RemoteTrack {
    RemoteTrack {
        service,
        remote_id: id.to_string(),
        artist: artist.to_string(),
        title: title.to_string(),
        added_at: None,
        duration_ms: None,
    }
}

pub fn test_config(propagate_deletions: bool) -> liked_sync_daemon::config::AppConfig {
    let mut config = liked_sync_daemon::config::AppConfig::default();
    config.sync.propagate_deletions = propagate_deletions;
    config
}
