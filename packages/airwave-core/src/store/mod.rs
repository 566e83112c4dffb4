//! Persistence interfaces consumed by the orchestration core.
//!
//! The core never touches storage directly; it talks to these traits. The
//! JSON-file implementations in [`json`] are the default backend; tests
//! substitute in-memory fakes.

mod json;
pub mod library;

pub use json::{JsonChatStore, JsonPlaybackStateStore, JsonScheduleStore, JsonSongStore};
pub use library::MusicLibrary;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{PlaybackState, Schedule, Song};

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying filesystem failure.
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted file exists but could not be parsed.
    #[error("store data corrupt: {0}")]
    Corrupt(String),

    /// The addressed row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Convenient Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Read/reserve access to the voted song queue.
///
/// The core writes exactly three things here: the pre-fetch reservation
/// (`reserve`), its rollback (`restore`), and the airing stamp (`mark_aired`).
/// Everything else about song lifecycle belongs to the submission/vote layer.
#[async_trait]
pub trait SongStore: Send + Sync {
    /// The top-voted unplayed song: `starred DESC, vote_count DESC, added_at ASC`.
    async fn top_unplayed(&self) -> StoreResult<Option<Song>>;

    /// Looks a song up by id.
    async fn get(&self, id: i64) -> StoreResult<Option<Song>>;

    /// All unplayed songs in selection order (the visible queue).
    async fn queue(&self) -> StoreResult<Vec<Song>>;

    /// Most recently aired songs, newest first. Reservations (played without
    /// `played_at`) are excluded.
    async fn recently_played(&self, limit: usize) -> StoreResult<Vec<Song>>;

    /// Removes a song from the visible queue without stamping an airing
    /// (`played = true`, `played_at = None`).
    async fn reserve(&self, id: i64) -> StoreResult<()>;

    /// Stamps an actual airing (`played = true`, `played_at = now`).
    async fn mark_aired(&self, id: i64) -> StoreResult<()>;

    /// Rolls back a reservation (`played = false`, `played_at = None`).
    async fn restore(&self, id: i64) -> StoreResult<()>;
}

/// CRUD access to broadcast schedules.
///
/// The core writes only `last_run` and `next_run`; everything else is admin
/// CRUD at the HTTP boundary.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn list(&self) -> StoreResult<Vec<Schedule>>;

    async fn list_active(&self) -> StoreResult<Vec<Schedule>>;

    async fn get(&self, id: i64) -> StoreResult<Option<Schedule>>;

    /// Inserts a new schedule, assigning its id.
    async fn create(&self, schedule: Schedule) -> StoreResult<Schedule>;

    /// Replaces an existing schedule.
    async fn update(&self, schedule: Schedule) -> StoreResult<()>;

    async fn delete(&self, id: i64) -> StoreResult<()>;

    async fn set_last_run(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    async fn set_next_run(&self, id: i64, at: Option<DateTime<Utc>>) -> StoreResult<()>;
}

/// Access to the persisted playback singleton.
#[async_trait]
pub trait PlaybackStateStore: Send + Sync {
    /// Find-or-create of the singleton row.
    async fn get_current(&self) -> StoreResult<PlaybackState>;

    async fn save(&self, state: &PlaybackState) -> StoreResult<()>;
}

/// Retention interface to the chat message store.
///
/// Chat itself is outside the core; the scheduler's maintenance job only
/// prunes old messages through this trait.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Deletes messages sent before `cutoff`; returns how many were removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}
