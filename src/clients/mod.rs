//! External-service client contracts (spec §4.3). Both real clients
//! (`service_a`, `service_b`) implement the same four operations; the
//! engine is written against the trait, never against a concrete client,
//! so tests drive it with an in-memory fake.

pub mod service_a;
pub mod service_b;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use crate::matcher::RemoteTrack;
use crate::error::Result;
use crate::store::Service;

/// A session handle acquired via [`ServiceClient::open_session`]. Holding
/// it keeps the underlying transport/credentials alive; dropping it
/// releases them. The engine acquires both clients' sessions before a
/// cycle and lets them drop together at scope exit (spec §4.3
/// `scoped_session`, §4.4 step (b)).
pub trait Session: Send {}

/// The contract both service clients satisfy (spec §4.3). `search`
/// returns the service's own notion of "best candidate" — the matcher
/// only decides whether to accept it, never re-ranks (spec §9).
#[async_trait]
pub trait ServiceClient: Send + Sync {
    fn service(&self) -> Service;

    /// Acquire a transport/credential session for the duration of a
    /// cycle. Implementations may no-op if they hold no per-cycle state.
    async fn open_session(&self) -> Result<Box<dyn Session>>;

    /// Newest-first liked tracks. When `since` is given, stops as soon as
    /// a track's `added_at` is strictly earlier (the source paginates in
    /// reverse-chronological order, spec §4.3).
    async fn fetch_liked(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteTrack>>;

    /// Batched, idempotent on duplicates.
    async fn like(&self, remote_ids: &[String]) -> Result<()>;

    /// Batched, idempotent when already absent.
    async fn unlike(&self, remote_ids: &[String]) -> Result<()>;

    /// The single best candidate for `(artist, title)`, or `None`.
    async fn search(&self, artist: &str, title: &str) -> Result<Option<RemoteTrack>>;
}

/// A no-op session for clients with nothing to release on drop.
pub struct NullSession;
impl Session for NullSession {}
