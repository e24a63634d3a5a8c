//! Row types for the five store entities (spec §3). Grounded directly on
//! `original_source/storage/models.py`'s pydantic models, translated to
//! `sqlx::FromRow` structs over `TEXT`/`INTEGER` columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    A,
    B,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Service::A => "service_a",
            Service::B => "service_b",
        }
    }

    pub fn other(self) -> Service {
        match self {
            Service::A => Service::B,
            Service::B => Service::A,
        }
    }
}

impl std::str::FromStr for Service {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service_a" => Ok(Service::A),
            "service_b" => Ok(Service::B),
            other => Err(crate::error::SyncError::Store(format!(
                "unknown service tag `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Liked,
    Playlist,
    Album,
}

impl CollectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionKind::Liked => "liked",
            CollectionKind::Playlist => "playlist",
            CollectionKind::Album => "album",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    AToB,
    BToA,
    Bidirectional,
}

impl SyncDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncDirection::AToB => "a_to_b",
            SyncDirection::BToA => "b_to_a",
            SyncDirection::Bidirectional => "bidirectional",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            other => Err(crate::error::SyncError::Store(format!(
                "unknown sync mode `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }
}

/// A row recording the identity of one track across both services.
/// `remote_id_a` / `remote_id_b` carry the service-tagged remote ids;
/// invariant: at least one is non-null (enforced by the schema's
/// `CHECK` constraint, mirrored in [`super::Store::upsert_mapping`]).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TrackMapping {
    pub id: i64,
    pub remote_id_a: Option<String>,
    pub remote_id_b: Option<String>,
    pub artist: String,
    pub title: String,
    pub match_confidence: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    pub service: String,
    pub kind: String,
    pub remote_id: Option<String>,
    pub title: String,
    pub paired_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Collection {
    pub fn service(&self) -> Service {
        self.service.parse().expect("store rows carry a valid service tag")
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CollectionTrack {
    pub collection_id: i64,
    pub mapping_id: i64,
    pub position: Option<i64>,
    pub added_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Unmatched {
    pub id: i64,
    pub source_service: String,
    pub source_remote_id: String,
    pub artist: String,
    pub title: String,
    pub attempts: i64,
    pub last_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Unmatched {
    pub fn source_service(&self) -> Service {
        self.source_service
            .parse()
            .expect("store rows carry a valid service tag")
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub collection_id: Option<i64>,
    pub direction: String,
    pub mode: String,
    pub status: String,
    pub stats_json: Option<String>,
    pub error_message: Option<String>,
}

/// Accumulated per-cycle counters (spec §4.4), serialised into
/// `sync_runs.stats_json` on finish.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub a_added: u64,
    pub b_added: u64,
    pub a_removed: u64,
    pub b_removed: u64,
    pub cross_matched: u64,
    pub unmatched: u64,
    pub retried_ok: u64,
    pub errors: u64,
}
