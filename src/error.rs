//! Error taxonomy for the sync daemon.
//!
//! The kinds below are the closed set the engine, clients, and store
//! agree on; everything else in the process collapses into one of them
//! on its way out of a cycle.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Credentials rejected by a service after a refresh attempt.
    /// Actionable — names the config key the operator should update.
    #[error("authentication failed for {service}: {detail} (check config key `{config_key}`)")]
    Auth {
        service: &'static str,
        detail: String,
        config_key: &'static str,
    },

    /// Server-requested backoff; retried automatically by the caller.
    #[error("{service} rate limited, retry after {retry_after_secs}s")]
    RateLimit {
        service: &'static str,
        retry_after_secs: u64,
    },

    /// Network/transport failure. Retried with backoff on client A,
    /// propagated immediately on client B.
    #[error("{service} network error: {0}", service = .service)]
    Network {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// `search` returned no candidate. Not an error in the ordinary
    /// sense — the caller turns this into an Unmatched row.
    #[error("no match found for {artist} - {title}")]
    NotFound { artist: String, title: String },

    /// `search` returned a candidate but the matcher rejected it.
    #[error("search result rejected by matcher for {artist} - {title}")]
    Mismatch { artist: String, title: String },

    /// Unique-constraint or foreign-key violation. Counted as a
    /// per-track error; the cycle continues.
    #[error("store constraint violated: {0}")]
    Store(String),

    /// Anything else escaping the cycle body.
    #[error("fatal: {0}")]
    Fatal(#[from] anyhow::Error),

    /// `run_sync` was called while a cycle was already in flight. Raised
    /// by the single-flight guard before the cycle body starts, so it is
    /// not one of the seven in-cycle kinds above (spec §5, §8).
    #[error("sync already in progress")]
    Busy,
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                return SyncError::Store(db_err.message().to_string());
            }
        }
        SyncError::Fatal(anyhow::Error::new(err))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network {
            service: "service_a",
            source: anyhow::Error::new(err),
        }
    }
}

impl SyncError {
    /// True for the kinds addition-propagation and retry treat as
    /// "counted, not fatal" per spec §7's propagation policy.
    pub fn is_per_track(&self) -> bool {
        matches!(
            self,
            SyncError::NotFound { .. } | SyncError::Mismatch { .. } | SyncError::Store(_)
        )
    }
}
