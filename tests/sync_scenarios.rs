//! End-to-end scenario tests from spec §8, covering the paths not
//! already exercised by the in-module unit tests in `src/engine.rs`
//! (first sync, cross-match, bidirectional addition, single-flight, and
//! mode gating are covered there): full-mode deletion propagation,
//! incremental mode skipping removals, and retrying a previously
//! unmatched track.

mod common;

use std::sync::Arc;

use liked_sync_daemon::clients::ServiceClient;
use liked_sync_daemon::engine::SyncEngine;
use liked_sync_daemon::store::{Service, Store, SyncDirection, SyncMode, SyncStatus};

use common::{track, FakeClient};

#[tokio::test]
async fn full_mode_deletion_propagation_unlikes_and_marks_removed() {
    let store = Store::connect_in_memory().await.unwrap();

    let col_a = store.ensure_liked_collection(Service::A).await.unwrap();
    let col_b = store.ensure_liked_collection(Service::B).await.unwrap();
    store.pair_collections(col_a.id, col_b.id).await.unwrap();

    let mapping = store
        .upsert_mapping("Art", "Song", Some("sp1"), Some("ym1"), 1.0)
        .await
        .unwrap();
    store.add_to_collection(col_a.id, mapping.id, None, None).await.unwrap();
    store.add_to_collection(col_b.id, mapping.id, None, None).await.unwrap();

    let fake_a = Arc::new(FakeClient::new(Service::A, vec![]));
    let fake_b = Arc::new(FakeClient::new(Service::B, vec![]));
    let client_a: Arc<dyn ServiceClient> = fake_a.clone();
    let client_b: Arc<dyn ServiceClient> = fake_b.clone();

    let mut config = liked_sync_daemon::config::AppConfig::default();
    config.sync.propagate_deletions = true;
    let engine = SyncEngine::new(store.clone(), client_a, client_b, &config);

    let stats = engine.run_sync(None).await.unwrap();
    assert_eq!(stats.a_removed, 1);

    let unlike_calls = fake_b.unlike_calls.lock().await.clone();
    assert_eq!(unlike_calls, vec![vec!["ym1".to_string()]]);

    let a_tracks = store.list_collection_tracks(col_a.id, true).await.unwrap();
    let b_tracks = store.list_collection_tracks(col_b.id, true).await.unwrap();
    assert!(a_tracks[0].removed_at.is_some());
    assert!(b_tracks[0].removed_at.is_some());
}

#[tokio::test]
async fn incremental_mode_never_calls_unlike_even_with_propagate_deletions() {
    let store = Store::connect_in_memory().await.unwrap();

    let col_a = store.ensure_liked_collection(Service::A).await.unwrap();
    let col_b = store.ensure_liked_collection(Service::B).await.unwrap();
    store.pair_collections(col_a.id, col_b.id).await.unwrap();

    let mapping = store
        .upsert_mapping("Art", "Song", Some("sp1"), Some("ym1"), 1.0)
        .await
        .unwrap();
    store.add_to_collection(col_a.id, mapping.id, None, None).await.unwrap();
    store.add_to_collection(col_b.id, mapping.id, None, None).await.unwrap();

    // A prior completed run is required, otherwise mode gating (spec
    // §9) forces full regardless of the configured/override mode.
    let run = store
        .start_run(SyncDirection::Bidirectional, SyncMode::Incremental, None)
        .await
        .unwrap();
    store
        .finish_run(run.id, SyncStatus::Completed, None, None)
        .await
        .unwrap();

    let fake_a = Arc::new(FakeClient::new(Service::A, vec![]));
    let fake_b = Arc::new(FakeClient::new(Service::B, vec![]));
    let client_a: Arc<dyn ServiceClient> = fake_a.clone();
    let client_b: Arc<dyn ServiceClient> = fake_b.clone();

    let mut config = liked_sync_daemon::config::AppConfig::default();
    config.sync.propagate_deletions = true;
    config.sync.mode = SyncMode::Incremental;
    let engine = SyncEngine::new(store.clone(), client_a, client_b, &config);

    let stats = engine.run_sync(None).await.unwrap();
    assert_eq!(stats.a_removed, 0);
    assert_eq!(stats.b_removed, 0);

    let unlike_calls = fake_b.unlike_calls.lock().await.clone();
    assert!(unlike_calls.is_empty());

    let a_tracks = store.list_collection_tracks(col_a.id, true).await.unwrap();
    assert!(a_tracks[0].removed_at.is_none());
}

#[tokio::test]
async fn retrying_an_unmatched_track_resolves_it_on_a_good_match() {
    let store = Store::connect_in_memory().await.unwrap();
    store.add_unmatched(Service::A, "sp1", "Art", "Song").await.unwrap();

    let client_a: Arc<dyn ServiceClient> = Arc::new(FakeClient::new(Service::A, vec![]));
    let fake_b = Arc::new(
        FakeClient::new(Service::B, vec![])
            .with_search("Art", "Song", Some(track("b", "ym_found", "Art", "Song")))
            .await,
    );
    let client_b: Arc<dyn ServiceClient> = fake_b.clone();

    let config = liked_sync_daemon::config::AppConfig::default();
    let engine = SyncEngine::new(store.clone(), client_a, client_b, &config);

    let stats = engine.run_sync(None).await.unwrap();
    assert_eq!(stats.retried_ok, 1);

    let like_calls = fake_b.like_calls.lock().await.clone();
    assert_eq!(like_calls, vec![vec!["ym_found".to_string()]]);

    let remaining = store.list_unmatched(Some(Service::A)).await.unwrap();
    assert!(remaining.is_empty());
}
