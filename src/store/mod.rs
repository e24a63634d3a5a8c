//! Durable local state (spec §3, §4.1): the five-entity schema over a
//! WAL-mode SQLite file. The engine is the sole writer; every operation
//! here is used from inside one sync cycle, sequenced by the engine so
//! cross-row consistency never depends on store-level locking.
//!
//! Schema and upsert shapes are grounded directly on
//! `original_source/storage/database.py`'s `CREATE TABLE` / `ON CONFLICT`
//! statements; the pool-wrapper shape follows the teacher's
//! `services/catalog_sync` `Database { pool }` idiom, swapped to SQLite.

pub mod models;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

pub use models::{
    Collection, CollectionKind, CollectionTrack, Service, SyncDirection, SyncMode, SyncRun,
    SyncStats, SyncStatus, TrackMapping, Unmatched,
};

use crate::error::{Result, SyncError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS track_mapping (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id_a TEXT,
    remote_id_b TEXT,
    artist TEXT NOT NULL,
    title TEXT NOT NULL,
    match_confidence REAL NOT NULL DEFAULT 1.0,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    CHECK (remote_id_a IS NOT NULL OR remote_id_b IS NOT NULL),
    UNIQUE (remote_id_a),
    UNIQUE (remote_id_b)
);

CREATE TABLE IF NOT EXISTS collection (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service TEXT NOT NULL CHECK (service IN ('service_a', 'service_b')),
    kind TEXT NOT NULL CHECK (kind IN ('liked', 'playlist', 'album')),
    remote_id TEXT,
    title TEXT NOT NULL,
    paired_id INTEGER REFERENCES collection(id),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE (service, kind, remote_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_liked_per_service
    ON collection(service) WHERE kind = 'liked';

CREATE TABLE IF NOT EXISTS collection_track (
    collection_id INTEGER NOT NULL REFERENCES collection(id),
    mapping_id INTEGER NOT NULL REFERENCES track_mapping(id),
    position INTEGER,
    added_at TEXT,
    synced_at TEXT,
    removed_at TEXT,
    UNIQUE (collection_id, mapping_id)
);

CREATE TABLE IF NOT EXISTS unmatched (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_service TEXT NOT NULL CHECK (source_service IN ('service_a', 'service_b')),
    source_remote_id TEXT NOT NULL,
    artist TEXT NOT NULL,
    title TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 1,
    last_attempt_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE (source_service, source_remote_id)
);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    collection_id INTEGER REFERENCES collection(id),
    direction TEXT NOT NULL CHECK (direction IN ('a_to_b', 'b_to_a', 'bidirectional')),
    mode TEXT NOT NULL CHECK (mode IN ('full', 'incremental')),
    status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed', 'cancelled')),
    stats_json TEXT,
    error_message TEXT
);
"#;

/// Wraps the sqlite pool, mirroring the teacher's `Database { pool: PgPool }`
/// shape. WAL mode is enabled on connect so background readers never block
/// the engine's writes (spec §4.1).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// An ephemeral in-memory store, used by unit and integration tests
    /// that need a fresh schema without touching the filesystem.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    // -- track_mapping --------------------------------------------------

    /// Insert a mapping, or on unique-conflict of either remote id, fill
    /// the null counterpart and refresh artist/title/confidence (spec
    /// §4.1 `upsert_mapping`).
    pub async fn upsert_mapping(
        &self,
        artist: &str,
        title: &str,
        remote_id_a: Option<&str>,
        remote_id_b: Option<&str>,
        confidence: f64,
    ) -> Result<TrackMapping> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, TrackMapping>(
            r#"
            INSERT INTO track_mapping (remote_id_a, remote_id_b, artist, title, match_confidence, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (remote_id_a) DO UPDATE SET
                remote_id_b = COALESCE(excluded.remote_id_b, track_mapping.remote_id_b),
                artist = excluded.artist,
                title = excluded.title,
                match_confidence = excluded.match_confidence,
                updated_at = excluded.updated_at
            ON CONFLICT (remote_id_b) DO UPDATE SET
                remote_id_a = COALESCE(excluded.remote_id_a, track_mapping.remote_id_a),
                artist = excluded.artist,
                title = excluded.title,
                match_confidence = excluded.match_confidence,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(remote_id_a)
        .bind(remote_id_b)
        .bind(artist)
        .bind(title)
        .bind(confidence)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn find_mapping_by_remote(
        &self,
        service: Service,
        remote_id: &str,
    ) -> Result<Option<TrackMapping>> {
        let sql = match service {
            Service::A => "SELECT * FROM track_mapping WHERE remote_id_a = ?",
            Service::B => "SELECT * FROM track_mapping WHERE remote_id_b = ?",
        };
        let row = sqlx::query_as::<_, TrackMapping>(sql)
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn get_mappings_by_ids(&self, ids: &[i64]) -> Result<Vec<TrackMapping>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT * FROM track_mapping WHERE id IN ({placeholders})");
        let mut query = sqlx::query_as::<_, TrackMapping>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    // -- collection -------------------------------------------------------

    pub async fn ensure_liked_collection(&self, service: Service) -> Result<Collection> {
        if let Some(existing) = self.find_liked_collection(service).await? {
            return Ok(existing);
        }
        let row = sqlx::query_as::<_, Collection>(
            r#"
            INSERT INTO collection (service, kind, title)
            VALUES (?, 'liked', 'Liked Tracks')
            ON CONFLICT (service) WHERE kind = 'liked' DO UPDATE SET title = collection.title
            RETURNING *
            "#,
        )
        .bind(service.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_liked_collection(&self, service: Service) -> Result<Option<Collection>> {
        let row = sqlx::query_as::<_, Collection>(
            "SELECT * FROM collection WHERE service = ? AND kind = 'liked'",
        )
        .bind(service.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_collection(&self, id: i64) -> Result<Option<Collection>> {
        let row = sqlx::query_as::<_, Collection>("SELECT * FROM collection WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Set each side's `paired_id` to the other, atomically (spec §4.1).
    pub async fn pair_collections(&self, a_id: i64, b_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE collection SET paired_id = ? WHERE id = ?")
            .bind(b_id)
            .bind(a_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE collection SET paired_id = ? WHERE id = ?")
            .bind(a_id)
            .bind(b_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // -- collection_track ---------------------------------------------------

    /// Upsert membership; clears `removed_at`, refreshes `synced_at`
    /// (spec §4.1 `add_to_collection`, and the soft-delete reversibility
    /// invariant of spec §8).
    pub async fn add_to_collection(
        &self,
        collection_id: i64,
        mapping_id: i64,
        position: Option<i64>,
        added_at: Option<DateTime<Utc>>,
    ) -> Result<CollectionTrack> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, CollectionTrack>(
            r#"
            INSERT INTO collection_track (collection_id, mapping_id, position, added_at, synced_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (collection_id, mapping_id) DO UPDATE SET
                position = excluded.position,
                synced_at = excluded.synced_at,
                removed_at = NULL
            RETURNING *
            "#,
        )
        .bind(collection_id)
        .bind(mapping_id)
        .bind(position)
        .bind(added_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn mark_removed(&self, collection_id: i64, mapping_id: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            "UPDATE collection_track SET removed_at = ? WHERE collection_id = ? AND mapping_id = ?",
        )
        .bind(now)
        .bind(collection_id)
        .bind(mapping_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_collection_tracks(
        &self,
        collection_id: i64,
        include_removed: bool,
    ) -> Result<Vec<CollectionTrack>> {
        let sql = if include_removed {
            "SELECT * FROM collection_track WHERE collection_id = ? ORDER BY position"
        } else {
            "SELECT * FROM collection_track WHERE collection_id = ? AND removed_at IS NULL ORDER BY position"
        };
        Ok(sqlx::query_as::<_, CollectionTrack>(sql)
            .bind(collection_id)
            .fetch_all(&self.pool)
            .await?)
    }

    // -- unmatched ----------------------------------------------------------

    /// Insert, or on conflict of `(source_service, source_remote_id)`,
    /// increment `attempts` and touch `last_attempt_at` — the same
    /// insert-on-conflict path used for both a fresh miss and a retry
    /// miss (spec §9 open question).
    pub async fn add_unmatched(
        &self,
        service: Service,
        source_remote_id: &str,
        artist: &str,
        title: &str,
    ) -> Result<Unmatched> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, Unmatched>(
            r#"
            INSERT INTO unmatched (source_service, source_remote_id, artist, title, last_attempt_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (source_service, source_remote_id) DO UPDATE SET
                attempts = unmatched.attempts + 1,
                last_attempt_at = excluded.last_attempt_at
            RETURNING *
            "#,
        )
        .bind(service.as_str())
        .bind(source_remote_id)
        .bind(artist)
        .bind(title)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn resolve_unmatched(&self, service: Service, source_remote_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM unmatched WHERE source_service = ? AND source_remote_id = ?")
            .bind(service.as_str())
            .bind(source_remote_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_unmatched(&self, service: Option<Service>) -> Result<Vec<Unmatched>> {
        let rows = match service {
            Some(service) => {
                sqlx::query_as::<_, Unmatched>(
                    "SELECT * FROM unmatched WHERE source_service = ? ORDER BY id",
                )
                .bind(service.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Unmatched>("SELECT * FROM unmatched ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows)
    }

    // -- sync_runs ------------------------------------------------------------

    pub async fn start_run(
        &self,
        direction: SyncDirection,
        mode: SyncMode,
        collection_id: Option<i64>,
    ) -> Result<SyncRun> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, SyncRun>(
            r#"
            INSERT INTO sync_runs (started_at, collection_id, direction, mode, status)
            VALUES (?, ?, ?, ?, 'running')
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(collection_id)
        .bind(direction.as_str())
        .bind(mode.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn finish_run(
        &self,
        run_id: i64,
        status: SyncStatus,
        stats: Option<&SyncStats>,
        error: Option<&str>,
    ) -> Result<SyncRun> {
        let now = Utc::now();
        let stats_json = stats
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| SyncError::Fatal(anyhow::Error::new(e)))?;
        let row = sqlx::query_as::<_, SyncRun>(
            r#"
            UPDATE sync_runs SET finished_at = ?, status = ?, stats_json = ?, error_message = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(status.as_str())
        .bind(stats_json)
        .bind(error)
        .bind(run_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn last_successful_run(&self) -> Result<Option<SyncRun>> {
        let row = sqlx::query_as::<_, SyncRun>(
            "SELECT * FROM sync_runs WHERE status = 'completed' ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_runs(&self, limit: i64, offset: i64) -> Result<Vec<SyncRun>> {
        Ok(sqlx::query_as::<_, SyncRun>(
            "SELECT * FROM sync_runs ORDER BY id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?)
    }

    // -- aggregate counters, read by the RPC/status surface only -----------

    pub async fn count_mappings(&self) -> Result<i64> {
        self.count_rows("track_mapping").await
    }

    pub async fn count_unmatched(&self) -> Result<i64> {
        self.count_rows("unmatched").await
    }

    pub async fn count_collections(&self) -> Result<i64> {
        self.count_rows("collection").await
    }

    pub async fn count_runs(&self) -> Result<i64> {
        self.count_rows("sync_runs").await
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_mapping_fills_null_counterpart_on_conflict() {
        let store = Store::connect_in_memory().await.unwrap();
        let first = store
            .upsert_mapping("Artist", "Song", Some("a1"), None, 1.0)
            .await
            .unwrap();
        assert!(first.remote_id_b.is_none());

        let second = store
            .upsert_mapping("Artist", "Song", Some("a1"), Some("b1"), 1.0)
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.remote_id_b.as_deref(), Some("b1"));
    }

    #[tokio::test]
    async fn unique_liked_collection_per_service() {
        let store = Store::connect_in_memory().await.unwrap();
        let first = store.ensure_liked_collection(Service::A).await.unwrap();
        let second = store.ensure_liked_collection(Service::A).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn pair_collections_is_symmetric() {
        let store = Store::connect_in_memory().await.unwrap();
        let a = store.ensure_liked_collection(Service::A).await.unwrap();
        let b = store.ensure_liked_collection(Service::B).await.unwrap();
        store.pair_collections(a.id, b.id).await.unwrap();

        let a = store.get_collection(a.id).await.unwrap().unwrap();
        let b = store.get_collection(b.id).await.unwrap().unwrap();
        assert_eq!(a.paired_id, Some(b.id));
        assert_eq!(b.paired_id, Some(a.id));
    }

    #[tokio::test]
    async fn soft_delete_is_reversible() {
        let store = Store::connect_in_memory().await.unwrap();
        let col = store.ensure_liked_collection(Service::A).await.unwrap();
        let mapping = store
            .upsert_mapping("Artist", "Song", Some("a1"), None, 1.0)
            .await
            .unwrap();
        store
            .add_to_collection(col.id, mapping.id, None, None)
            .await
            .unwrap();
        store.mark_removed(col.id, mapping.id).await.unwrap();

        let active = store.list_collection_tracks(col.id, false).await.unwrap();
        assert!(active.is_empty());

        store
            .add_to_collection(col.id, mapping.id, None, None)
            .await
            .unwrap();
        let active = store.list_collection_tracks(col.id, false).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].removed_at.is_none());
    }

    #[tokio::test]
    async fn add_unmatched_increments_attempts_on_conflict() {
        let store = Store::connect_in_memory().await.unwrap();
        let first = store
            .add_unmatched(Service::A, "a1", "Artist", "Song")
            .await
            .unwrap();
        assert_eq!(first.attempts, 1);
        let second = store
            .add_unmatched(Service::A, "a1", "Artist", "Song")
            .await
            .unwrap();
        assert_eq!(second.attempts, 2);
    }

    #[tokio::test]
    async fn sync_run_transitions_exactly_once() {
        let store = Store::connect_in_memory().await.unwrap();
        let run = store
            .start_run(SyncDirection::Bidirectional, SyncMode::Full, None)
            .await
            .unwrap();
        assert_eq!(run.status, "running");
        assert!(run.finished_at.is_none());

        let finished = store
            .finish_run(run.id, SyncStatus::Completed, Some(&SyncStats::default()), None)
            .await
            .unwrap();
        assert_eq!(finished.status, "completed");
        assert!(finished.finished_at.is_some());
    }
}
