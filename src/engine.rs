//! The sync engine (spec §4.4): orchestrates one cycle end to end,
//! enforcing the idle/syncing/error state machine and the single-flight
//! invariant. Grounded line-for-line on `original_source/sync/engine.py`
//! (`SyncEngine._do_sync`, `_full_sync`, `_incremental_sync`,
//! `_propagate_additions`, `_retry_unmatched`); the `Arc<RwLock<...>>`
//! state-enum scaffolding follows `services/catalog_sync/orchestrator.rs`'s
//! `SyncRunState`/`active_runs` pattern, specialised to the spec's fixed
//! two-client model.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::clients::ServiceClient;
use crate::config::AppConfig;
use crate::error::{Result, SyncError};
use crate::matcher::{cross_match, is_good_match, RemoteTrack};
use crate::store::{
    Collection, Service, Store, SyncDirection, SyncMode, SyncStats, SyncStatus, TrackMapping,
};

const MAX_UNMATCHED_ATTEMPTS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Syncing,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub last_stats: Option<SyncStats>,
    pub last_error: Option<String>,
}

pub struct SyncEngine {
    store: Store,
    client_a: Arc<dyn ServiceClient>,
    client_b: Arc<dyn ServiceClient>,
    propagate_deletions: bool,
    default_mode: SyncMode,
    state: RwLock<EngineState>,
    last_stats: RwLock<Option<SyncStats>>,
    last_error: RwLock<Option<String>>,
    run_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: Store,
        client_a: Arc<dyn ServiceClient>,
        client_b: Arc<dyn ServiceClient>,
        config: &AppConfig,
    ) -> Self {
        Self {
            store,
            client_a,
            client_b,
            propagate_deletions: config.sync.propagate_deletions,
            default_mode: config.sync.mode,
            state: RwLock::new(EngineState::Idle),
            last_stats: RwLock::new(None),
            last_error: RwLock::new(None),
            run_lock: Mutex::new(()),
        }
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            state: *self.state.read().await,
            last_stats: self.last_stats.read().await.clone(),
            last_error: self.last_error.read().await.clone(),
        }
    }

    /// The only public entry point (spec §4.4). Fails fast with
    /// [`SyncError::Busy`] if a cycle is already in flight.
    pub async fn run_sync(&self, mode_override: Option<SyncMode>) -> Result<SyncStats> {
        let _permit = self
            .run_lock
            .try_lock()
            .map_err(|_| SyncError::Busy)?;

        *self.state.write().await = EngineState::Syncing;

        let result = self.do_cycle(mode_override).await;

        match &result {
            Ok(stats) => {
                *self.state.write().await = EngineState::Idle;
                *self.last_stats.write().await = Some(stats.clone());
                *self.last_error.write().await = None;
            }
            Err(err) => {
                *self.state.write().await = EngineState::Error;
                *self.last_error.write().await = Some(err.to_string());
            }
        }

        result
    }

    fn client_for(&self, service: Service) -> &Arc<dyn ServiceClient> {
        match service {
            Service::A => &self.client_a,
            Service::B => &self.client_b,
        }
    }

    async fn do_cycle(&self, mode_override: Option<SyncMode>) -> Result<SyncStats> {
        let last_run = self.store.last_successful_run().await?;

        let effective_mode = if last_run.is_none() {
            SyncMode::Full
        } else if let Some(mode) = mode_override {
            mode
        } else {
            self.default_mode
        };

        tracing::info!(
            target: crate::logging::SYNC_TARGET_PREFIX,
            mode = effective_mode.as_str(),
            "sync_start"
        );

        let run = self
            .store
            .start_run(SyncDirection::Bidirectional, effective_mode, None)
            .await?;

        let mut stats = SyncStats::default();
        let cycle_result = self
            .run_cycle_body(effective_mode, last_run.and_then(|r| r.finished_at), &mut stats)
            .await;

        match cycle_result {
            Ok(()) => {
                self.store
                    .finish_run(run.id, SyncStatus::Completed, Some(&stats), None)
                    .await?;
                tracing::info!(
                    target: crate::logging::SYNC_TARGET_PREFIX,
                    cross_matched = stats.cross_matched,
                    unmatched = stats.unmatched,
                    errors = stats.errors,
                    "sync_completed"
                );
                Ok(stats)
            }
            Err(err) => {
                let _ = self
                    .store
                    .finish_run(run.id, SyncStatus::Failed, None, Some(&err.to_string()))
                    .await;
                tracing::error!(
                    target: crate::logging::SYNC_TARGET_PREFIX,
                    error = %err,
                    "sync_failed"
                );
                Err(err)
            }
        }
    }

    async fn run_cycle_body(
        &self,
        mode: SyncMode,
        since: Option<DateTime<Utc>>,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let _session_a = self.client_a.open_session().await?;
        let _session_b = self.client_b.open_session().await?;

        let (col_a, col_b) = self.ensure_collections().await?;

        match mode {
            SyncMode::Full => self.full_cycle(&col_a, &col_b, stats).await,
            SyncMode::Incremental => self.incremental_cycle(&col_a, &col_b, since, stats).await,
        }
    }

    async fn ensure_collections(&self) -> Result<(Collection, Collection)> {
        let mut col_a = self.store.ensure_liked_collection(Service::A).await?;
        let mut col_b = self.store.ensure_liked_collection(Service::B).await?;

        if col_a.paired_id.is_none() || col_b.paired_id.is_none() {
            self.store.pair_collections(col_a.id, col_b.id).await?;
            col_a = self
                .store
                .get_collection(col_a.id)
                .await?
                .expect("collection just paired");
            col_b = self
                .store
                .get_collection(col_b.id)
                .await?
                .expect("collection just paired");
        }

        Ok((col_a, col_b))
    }

    // -- full cycle (spec §4.4 step d) ---------------------------------

    async fn full_cycle(
        &self,
        col_a: &Collection,
        col_b: &Collection,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let (a_tracks, b_tracks) = tokio::try_join!(
            self.client_a.fetch_liked(None),
            self.client_b.fetch_liked(None)
        )?;

        let db_a_tracks = self.store.list_collection_tracks(col_a.id, false).await?;
        let db_b_tracks = self.store.list_collection_tracks(col_b.id, false).await?;

        let a_mapping_ids: HashSet<i64> = db_a_tracks.iter().map(|ct| ct.mapping_id).collect();
        let b_mapping_ids: HashSet<i64> = db_b_tracks.iter().map(|ct| ct.mapping_id).collect();

        let all_ids: Vec<i64> = a_mapping_ids.union(&b_mapping_ids).copied().collect();
        let mappings = self.store.get_mappings_by_ids(&all_ids).await?;

        let mut a_id_to_mapping: HashMap<&str, &TrackMapping> = HashMap::new();
        let mut b_id_to_mapping: HashMap<&str, &TrackMapping> = HashMap::new();
        for mapping in &mappings {
            if let Some(id) = &mapping.remote_id_a {
                a_id_to_mapping.insert(id.as_str(), mapping);
            }
            if let Some(id) = &mapping.remote_id_b {
                b_id_to_mapping.insert(id.as_str(), mapping);
            }
        }

        let remote_a_ids: HashSet<String> = a_tracks.iter().map(|t| t.remote_id.clone()).collect();
        let remote_b_ids: HashSet<String> = b_tracks.iter().map(|t| t.remote_id.clone()).collect();

        let a_new: Vec<RemoteTrack> = a_tracks
            .into_iter()
            .filter(|t| !a_id_to_mapping.contains_key(t.remote_id.as_str()))
            .collect();
        let b_new: Vec<RemoteTrack> = b_tracks
            .into_iter()
            .filter(|t| !b_id_to_mapping.contains_key(t.remote_id.as_str()))
            .collect();

        let a_removed: Vec<TrackMapping> = mappings
            .iter()
            .filter(|m| {
                a_mapping_ids.contains(&m.id)
                    && m.remote_id_a
                        .as_deref()
                        .is_some_and(|id| !remote_a_ids.contains(id))
            })
            .cloned()
            .collect();
        let b_removed: Vec<TrackMapping> = mappings
            .iter()
            .filter(|m| {
                b_mapping_ids.contains(&m.id)
                    && m.remote_id_b
                        .as_deref()
                        .is_some_and(|id| !remote_b_ids.contains(id))
            })
            .cloned()
            .collect();

        let (matches, unmatched_a, unmatched_b) = cross_match(a_new, b_new);
        self.apply_cross_matches(col_a.id, col_b.id, matches, stats)
            .await;

        if self.propagate_deletions {
            self.propagate_removals(col_a.id, col_b.id, a_removed, b_removed, stats)
                .await;
        }

        let mut existing_a_ids = remote_a_ids;
        let mut existing_b_ids = remote_b_ids;
        self.propagate_additions_side(
            Service::A,
            col_a.id,
            col_b.id,
            unmatched_a,
            &mut existing_b_ids,
            stats,
        )
        .await;
        self.propagate_additions_side(
            Service::B,
            col_b.id,
            col_a.id,
            unmatched_b,
            &mut existing_a_ids,
            stats,
        )
        .await;

        self.retry_unmatched(col_a.id, col_b.id, stats).await;

        Ok(())
    }

    // -- incremental cycle (spec §4.4 step e) --------------------------

    async fn incremental_cycle(
        &self,
        col_a: &Collection,
        col_b: &Collection,
        since: Option<DateTime<Utc>>,
        stats: &mut SyncStats,
    ) -> Result<()> {
        let (a_tracks, b_tracks) = tokio::try_join!(
            self.client_a.fetch_liked(since),
            self.client_b.fetch_liked(since)
        )?;

        let mut existing_a_ids: HashSet<String> =
            a_tracks.iter().map(|t| t.remote_id.clone()).collect();
        let mut existing_b_ids: HashSet<String> =
            b_tracks.iter().map(|t| t.remote_id.clone()).collect();

        let (matches, unmatched_a, unmatched_b) = cross_match(a_tracks, b_tracks);
        self.apply_cross_matches(col_a.id, col_b.id, matches, stats)
            .await;

        self.propagate_additions_side(
            Service::A,
            col_a.id,
            col_b.id,
            unmatched_a,
            &mut existing_b_ids,
            stats,
        )
        .await;
        self.propagate_additions_side(
            Service::B,
            col_b.id,
            col_a.id,
            unmatched_b,
            &mut existing_a_ids,
            stats,
        )
        .await;

        Ok(())
    }

    // -- shared helpers --------------------------------------------------

    async fn apply_cross_matches(
        &self,
        col_a_id: i64,
        col_b_id: i64,
        matches: Vec<crate::matcher::MatchResult>,
        stats: &mut SyncStats,
    ) {
        for m in matches {
            let outcome: Result<()> = async {
                let mapping = self
                    .store
                    .upsert_mapping(
                        &m.a_track.artist,
                        &m.a_track.title,
                        Some(&m.a_track.remote_id),
                        Some(&m.b_track.remote_id),
                        m.confidence,
                    )
                    .await?;
                self.store
                    .add_to_collection(col_a_id, mapping.id, None, parse_added_at(&m.a_track.added_at))
                    .await?;
                self.store
                    .add_to_collection(col_b_id, mapping.id, None, parse_added_at(&m.b_track.added_at))
                    .await?;
                Ok(())
            }
            .await;

            match outcome {
                Ok(()) => stats.cross_matched += 1,
                Err(err) => {
                    tracing::warn!(
                        target: crate::logging::SYNC_TARGET_PREFIX,
                        error = %err,
                        "cross_match_error"
                    );
                    stats.errors += 1;
                }
            }
        }
    }

    async fn propagate_removals(
        &self,
        col_a_id: i64,
        col_b_id: i64,
        a_removed: Vec<TrackMapping>,
        b_removed: Vec<TrackMapping>,
        stats: &mut SyncStats,
    ) {
        for mapping in a_removed {
            let outcome: Result<()> = async {
                self.store.mark_removed(col_a_id, mapping.id).await?;
                if let Some(remote_id_b) = &mapping.remote_id_b {
                    self.client_b.unlike(&[remote_id_b.clone()]).await?;
                    self.store.mark_removed(col_b_id, mapping.id).await?;
                }
                Ok(())
            }
            .await;
            match outcome {
                Ok(()) => stats.a_removed += 1,
                Err(err) => {
                    tracing::warn!(target: crate::logging::SYNC_TARGET_PREFIX, error = %err, "a_remove_error");
                    stats.errors += 1;
                }
            }
        }

        for mapping in b_removed {
            let outcome: Result<()> = async {
                self.store.mark_removed(col_b_id, mapping.id).await?;
                if let Some(remote_id_a) = &mapping.remote_id_a {
                    self.client_a.unlike(&[remote_id_a.clone()]).await?;
                    self.store.mark_removed(col_a_id, mapping.id).await?;
                }
                Ok(())
            }
            .await;
            match outcome {
                Ok(()) => stats.b_removed += 1,
                Err(err) => {
                    tracing::warn!(target: crate::logging::SYNC_TARGET_PREFIX, error = %err, "b_remove_error");
                    stats.errors += 1;
                }
            }
        }
    }

    /// Propagate additions for one side's still-unmatched tracks (spec
    /// §4.4 step f): upsert a source-only mapping, add source
    /// membership, search the other side, and either `like` + add
    /// membership on a good match or fall back to an Unmatched row.
    async fn propagate_additions_side(
        &self,
        source: Service,
        source_col_id: i64,
        target_col_id: i64,
        tracks: Vec<RemoteTrack>,
        existing_target_ids: &mut HashSet<String>,
        stats: &mut SyncStats,
    ) {
        let target = source.other();
        let target_client = self.client_for(target);

        for track in tracks {
            let outcome: Result<bool> = async {
                let mapping = self.upsert_source_only(source, &track).await?;
                self.store
                    .add_to_collection(source_col_id, mapping.id, None, parse_added_at(&track.added_at))
                    .await?;

                let found = target_client.search(&track.artist, &track.title).await?;
                let good_match = found.as_ref().is_some_and(|f| {
                    is_good_match(
                        &track.artist,
                        &track.title,
                        &f.artist,
                        &f.title,
                        track.duration_ms,
                        f.duration_ms,
                    )
                });

                match found {
                    Some(found) if good_match => {
                        let already = existing_target_ids.contains(&found.remote_id);
                        let mapping = self.upsert_both(source, &track, &found).await?;
                        if !already {
                            target_client.like(std::slice::from_ref(&found.remote_id)).await?;
                        }
                        self.store
                            .add_to_collection(
                                target_col_id,
                                mapping.id,
                                None,
                                parse_added_at(&found.added_at),
                            )
                            .await?;
                        existing_target_ids.insert(found.remote_id);
                        Ok(!already)
                    }
                    maybe_found => {
                        if let Some(found) = maybe_found {
                            tracing::info!(
                                target: crate::logging::SYNC_TARGET_PREFIX,
                                query = format!("{} - {}", track.artist, track.title),
                                found = format!("{} - {}", found.artist, found.title),
                                "search_mismatch"
                            );
                        }
                        self.store
                            .add_unmatched(source, &track.remote_id, &track.artist, &track.title)
                            .await?;
                        stats.unmatched += 1;
                        Ok(false)
                    }
                }
            }
            .await;

            match outcome {
                Ok(added) if added => match target {
                    Service::A => stats.a_added += 1,
                    Service::B => stats.b_added += 1,
                },
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        target: crate::logging::SYNC_TARGET_PREFIX,
                        error = %err,
                        "propagate_addition_error"
                    );
                    stats.errors += 1;
                }
            }
        }
    }

    /// Retry held-back Unmatched rows, full cycles only (spec §4.4 step g).
    async fn retry_unmatched(&self, col_a_id: i64, col_b_id: i64, stats: &mut SyncStats) {
        for source in [Service::A, Service::B] {
            let target = source.other();
            let target_client = self.client_for(target);
            let target_col_id = match target {
                Service::A => col_a_id,
                Service::B => col_b_id,
            };

            let unmatched = match self.store.list_unmatched(Some(source)).await {
                Ok(rows) => rows,
                Err(err) => {
                    tracing::warn!(target: crate::logging::SYNC_TARGET_PREFIX, error = %err, "retry_list_error");
                    stats.errors += 1;
                    continue;
                }
            };

            for um in unmatched {
                if um.attempts >= MAX_UNMATCHED_ATTEMPTS {
                    continue;
                }

                let outcome: Result<bool> = async {
                    let found = target_client.search(&um.artist, &um.title).await?;
                    let good_match = found
                        .as_ref()
                        .is_some_and(|f| is_good_match(&um.artist, &um.title, &f.artist, &f.title, None, None));

                    match found {
                        Some(found) if good_match => {
                            let (remote_id_a, remote_id_b) = match source {
                                Service::A => (Some(um.source_remote_id.as_str()), Some(found.remote_id.as_str())),
                                Service::B => (Some(found.remote_id.as_str()), Some(um.source_remote_id.as_str())),
                            };
                            let mapping = self
                                .store
                                .upsert_mapping(&um.artist, &um.title, remote_id_a, remote_id_b, 1.0)
                                .await?;
                            target_client.like(std::slice::from_ref(&found.remote_id)).await?;
                            self.store
                                .add_to_collection(target_col_id, mapping.id, None, None)
                                .await?;
                            self.store.resolve_unmatched(source, &um.source_remote_id).await?;
                            Ok(true)
                        }
                        _ => {
                            self.store
                                .add_unmatched(source, &um.source_remote_id, &um.artist, &um.title)
                                .await?;
                            Ok(false)
                        }
                    }
                }
                .await;

                match outcome {
                    Ok(true) => stats.retried_ok += 1,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(target: crate::logging::SYNC_TARGET_PREFIX, error = %err, "retry_unmatched_error");
                        stats.errors += 1;
                    }
                }
            }
        }
    }

    async fn upsert_source_only(&self, source: Service, track: &RemoteTrack) -> Result<TrackMapping> {
        match source {
            Service::A => {
                self.store
                    .upsert_mapping(&track.artist, &track.title, Some(&track.remote_id), None, 1.0)
                    .await
            }
            Service::B => {
                self.store
                    .upsert_mapping(&track.artist, &track.title, None, Some(&track.remote_id), 1.0)
                    .await
            }
        }
    }

    async fn upsert_both(
        &self,
        source: Service,
        source_track: &RemoteTrack,
        found: &RemoteTrack,
    ) -> Result<TrackMapping> {
        match source {
            Service::A => {
                self.store
                    .upsert_mapping(
                        &source_track.artist,
                        &source_track.title,
                        Some(&source_track.remote_id),
                        Some(&found.remote_id),
                        1.0,
                    )
                    .await
            }
            Service::B => {
                self.store
                    .upsert_mapping(
                        &source_track.artist,
                        &source_track.title,
                        Some(&found.remote_id),
                        Some(&source_track.remote_id),
                        1.0,
                    )
                    .await
            }
        }
    }
}

fn parse_added_at(raw: &Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{NullSession, Session};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    /// An in-memory fake implementing [`ServiceClient`], scripted with
    /// fixed liked lists and search results per spec §8's scenarios.
    struct FakeClient {
        service: Service,
        liked: Vec<RemoteTrack>,
        search_results: TokioMutex<HashMap<String, Option<RemoteTrack>>>,
        liked_calls: AtomicUsize,
        pub like_calls: TokioMutex<Vec<Vec<String>>>,
        pub unlike_calls: TokioMutex<Vec<Vec<String>>>,
    }

    impl FakeClient {
        fn new(service: Service, liked: Vec<RemoteTrack>) -> Self {
            Self {
                service,
                liked,
                search_results: TokioMutex::new(HashMap::new()),
                liked_calls: AtomicUsize::new(0),
                like_calls: TokioMutex::new(Vec::new()),
                unlike_calls: TokioMutex::new(Vec::new()),
            }
        }

        async fn with_search(self, artist: &str, title: &str, result: Option<RemoteTrack>) -> Self {
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
            self.liked_calls.fetch_add(1, Ordering::SeqCst);
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

    fn track(service: &'static str, id: &str, artist: &str, title: &str) -> RemoteTrack {
        RemoteTrack {
            service,
            remote_id: id.to_string(),
            artist: artist.to_string(),
            title: title.to_string(),
            added_at: None,
            duration_ms: None,
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.sync.propagate_deletions = true;
        config
    }

    #[tokio::test]
    async fn first_sync_forces_full_and_likes_found_track() {
        let store = Store::connect_in_memory().await.unwrap();
        let client_a = Arc::new(FakeClient::new(
            Service::A,
            vec![track("service_a", "sp1", "Artist A", "Song One")],
        ));
        let client_b = Arc::new(
            FakeClient::new(Service::B, vec![])
                .with_search(
                    "Artist A",
                    "Song One",
                    Some(track("service_b", "ym1", "Artist A", "Song One")),
                )
                .await,
        );

        let engine = SyncEngine::new(store, client_a, client_b.clone(), &test_config());
        let stats = engine.run_sync(None).await.unwrap();

        assert_eq!(stats.b_added, 1);
        assert_eq!(stats.cross_matched, 0);
        assert_eq!(stats.unmatched, 0);
        assert_eq!(*client_b.like_calls.lock().await, vec![vec!["ym1".to_string()]]);
    }

    #[tokio::test]
    async fn cross_match_on_first_sync_avoids_like_calls() {
        let store = Store::connect_in_memory().await.unwrap();
        let client_a = Arc::new(FakeClient::new(
            Service::A,
            vec![
                track("service_a", "sp1", "Artist A", "Song One"),
                track("service_a", "sp2", "Artist B", "Song Two"),
            ],
        ));
        let client_b = Arc::new(
            FakeClient::new(
                Service::B,
                vec![track("service_b", "ym1", "Artist A", "Song One")],
            )
            .with_search("Artist B", "Song Two", None)
            .await,
        );

        let engine = SyncEngine::new(store, client_a, client_b.clone(), &test_config());
        let stats = engine.run_sync(None).await.unwrap();

        assert_eq!(stats.cross_matched, 1);
        assert_eq!(stats.unmatched, 1);
        assert!(client_b.like_calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn bidirectional_addition_propagation_likes_both_sides() {
        let store = Store::connect_in_memory().await.unwrap();
        let client_a = Arc::new(
            FakeClient::new(Service::A, vec![track("service_a", "sp1", "Art", "Song")])
                .with_search("YmArt", "YmSong", Some(track("service_a", "sp_found", "YmArt", "YmSong")))
                .await,
        );
        let client_b = Arc::new(
            FakeClient::new(Service::B, vec![track("service_b", "ym1", "YmArt", "YmSong")])
                .with_search("Art", "Song", Some(track("service_b", "ym_found", "Art", "Song")))
                .await,
        );

        let engine = SyncEngine::new(store, client_a.clone(), client_b.clone(), &test_config());
        let stats = engine.run_sync(None).await.unwrap();

        assert_eq!(stats.a_added, 1);
        assert_eq!(stats.b_added, 1);
        assert_eq!(*client_a.like_calls.lock().await, vec![vec!["sp_found".to_string()]]);
        assert_eq!(*client_b.like_calls.lock().await, vec![vec!["ym_found".to_string()]]);
    }

    #[tokio::test]
    async fn single_flight_rejects_concurrent_run() {
        let store = Store::connect_in_memory().await.unwrap();
        let client_a = Arc::new(FakeClient::new(Service::A, vec![]));
        let client_b = Arc::new(FakeClient::new(Service::B, vec![]));
        let engine = Arc::new(SyncEngine::new(store, client_a, client_b, &test_config()));

        let e1 = engine.clone();
        let e2 = engine.clone();
        let (r1, r2) = tokio::join!(e1.run_sync(None), e2.run_sync(None));

        let busy_count = [&r1, &r2]
            .iter()
            .filter(|r| matches!(r, Err(SyncError::Busy)))
            .count();
        assert_eq!(busy_count, 1);
    }

    #[tokio::test]
    async fn mode_gating_forces_full_with_no_prior_successful_run() {
        let store = Store::connect_in_memory().await.unwrap();
        let client_a = Arc::new(FakeClient::new(Service::A, vec![]));
        let client_b = Arc::new(FakeClient::new(Service::B, vec![]));
        let mut config = test_config();
        config.sync.mode = SyncMode::Incremental;
        let engine = SyncEngine::new(store, client_a, client_b, &config);

        engine.run_sync(Some(SyncMode::Incremental)).await.unwrap();

        let runs = engine.store.list_runs(1, 0).await.unwrap();
        assert_eq!(runs[0].mode, "full");
    }
}
