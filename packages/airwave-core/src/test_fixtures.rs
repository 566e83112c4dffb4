//! Shared test fixtures: in-memory stores, a fake extractor, and a
//! recording event sink.
//!
//! These are used by multiple service test modules to avoid duplication.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::events::{EventSink, ServerEvent};
use crate::extract::{ExtractError, ExtractResult, StreamUrlExtractor};
use crate::model::{PlaybackState, Schedule, Song};
use crate::store::{
    ChatStore, PlaybackStateStore, ScheduleStore, SongStore, StoreError, StoreResult,
};

/// Builds an unplayed queue song.
pub fn song(id: i64, votes: i64) -> Song {
    Song {
        id,
        title: format!("Song {}", id),
        artist: "Artist".into(),
        url: format!("https://video.example/watch?v=v{}", id),
        video_id: format!("v{}", id),
        duration_secs: 200,
        thumbnail_url: String::new(),
        dedication: None,
        vote_count: votes,
        starred: false,
        added_at: Utc::now(),
        played: false,
        played_at: None,
    }
}

/// Builds an active weekday schedule.
pub fn schedule(id: i64) -> Schedule {
    Schedule {
        id,
        name: "Evening".into(),
        cron_expr: "0 17 * * 1-5".into(),
        volume: 70,
        song_count: 1,
        active: true,
        last_run: None,
        next_run: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory stores
// ─────────────────────────────────────────────────────────────────────────────

pub struct MemSongStore {
    pub songs: RwLock<Vec<Song>>,
}

impl MemSongStore {
    pub fn with(songs: Vec<Song>) -> Arc<Self> {
        Arc::new(Self {
            songs: RwLock::new(songs),
        })
    }

    fn mutate(&self, id: i64, f: impl FnOnce(&mut Song)) -> StoreResult<()> {
        let mut songs = self.songs.write();
        let song = songs
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("song {}", id)))?;
        f(song);
        Ok(())
    }
}

#[async_trait]
impl SongStore for MemSongStore {
    async fn top_unplayed(&self) -> StoreResult<Option<Song>> {
        Ok(self.queue().await?.into_iter().next())
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Song>> {
        Ok(self.songs.read().iter().find(|s| s.id == id).cloned())
    }

    async fn queue(&self) -> StoreResult<Vec<Song>> {
        let mut unplayed: Vec<Song> = self
            .songs
            .read()
            .iter()
            .filter(|s| !s.played)
            .cloned()
            .collect();
        unplayed.sort_by(|a, b| {
            b.starred
                .cmp(&a.starred)
                .then(b.vote_count.cmp(&a.vote_count))
                .then(a.added_at.cmp(&b.added_at))
        });
        Ok(unplayed)
    }

    async fn recently_played(&self, limit: usize) -> StoreResult<Vec<Song>> {
        let mut aired: Vec<Song> = self
            .songs
            .read()
            .iter()
            .filter(|s| s.played_at.is_some())
            .cloned()
            .collect();
        aired.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        aired.truncate(limit);
        Ok(aired)
    }

    async fn reserve(&self, id: i64) -> StoreResult<()> {
        self.mutate(id, |s| {
            s.played = true;
            s.played_at = None;
        })
    }

    async fn mark_aired(&self, id: i64) -> StoreResult<()> {
        self.mutate(id, |s| {
            s.played = true;
            s.played_at = Some(Utc::now());
        })
    }

    async fn restore(&self, id: i64) -> StoreResult<()> {
        self.mutate(id, |s| {
            s.played = false;
            s.played_at = None;
        })
    }
}

pub struct MemScheduleStore {
    pub schedules: RwLock<Vec<Schedule>>,
}

impl MemScheduleStore {
    pub fn with(schedules: Vec<Schedule>) -> Arc<Self> {
        Arc::new(Self {
            schedules: RwLock::new(schedules),
        })
    }
}

#[async_trait]
impl ScheduleStore for MemScheduleStore {
    async fn list(&self) -> StoreResult<Vec<Schedule>> {
        Ok(self.schedules.read().clone())
    }

    async fn list_active(&self) -> StoreResult<Vec<Schedule>> {
        Ok(self
            .schedules
            .read()
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Schedule>> {
        Ok(self.schedules.read().iter().find(|s| s.id == id).cloned())
    }

    async fn create(&self, mut schedule: Schedule) -> StoreResult<Schedule> {
        let mut schedules = self.schedules.write();
        schedule.id = schedules.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        schedules.push(schedule.clone());
        Ok(schedule)
    }

    async fn update(&self, schedule: Schedule) -> StoreResult<()> {
        let mut schedules = self.schedules.write();
        let existing = schedules
            .iter_mut()
            .find(|s| s.id == schedule.id)
            .ok_or_else(|| StoreError::NotFound(format!("schedule {}", schedule.id)))?;
        *existing = schedule;
        Ok(())
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        self.schedules.write().retain(|s| s.id != id);
        Ok(())
    }

    async fn set_last_run(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(s) = self.schedules.write().iter_mut().find(|s| s.id == id) {
            s.last_run = Some(at);
        }
        Ok(())
    }

    async fn set_next_run(&self, id: i64, at: Option<DateTime<Utc>>) -> StoreResult<()> {
        if let Some(s) = self.schedules.write().iter_mut().find(|s| s.id == id) {
            s.next_run = at;
        }
        Ok(())
    }
}

pub struct MemPlaybackStore {
    pub state: RwLock<PlaybackState>,
}

impl MemPlaybackStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(PlaybackState::default()),
        })
    }
}

#[async_trait]
impl PlaybackStateStore for MemPlaybackStore {
    async fn get_current(&self) -> StoreResult<PlaybackState> {
        Ok(self.state.read().clone())
    }

    async fn save(&self, state: &PlaybackState) -> StoreResult<()> {
        *self.state.write() = state.clone();
        Ok(())
    }
}

pub struct MemChatStore {
    pub sent_at: RwLock<Vec<DateTime<Utc>>>,
}

impl MemChatStore {
    pub fn with(sent_at: Vec<DateTime<Utc>>) -> Arc<Self> {
        Arc::new(Self {
            sent_at: RwLock::new(sent_at),
        })
    }
}

#[async_trait]
impl ChatStore for MemChatStore {
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut messages = self.sent_at.write();
        let before = messages.len();
        messages.retain(|at| *at >= cutoff);
        Ok(before - messages.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fake extractor & recording sink
// ─────────────────────────────────────────────────────────────────────────────

/// Extractor returning a deterministic CDN URL, or a timeout when `fail` is set.
pub struct FakeExtractor {
    pub fail: AtomicBool,
}

impl FakeExtractor {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl StreamUrlExtractor for FakeExtractor {
    async fn resolve(&self, url: &str) -> ExtractResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            Err(ExtractError::Timeout)
        } else {
            Ok(format!("https://cdn.example/direct?src={}", url))
        }
    }
}

/// Sink recording every broadcast event, in order.
pub struct RecordingSink {
    pub events: Mutex<Vec<ServerEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    /// The wire `type` tags of all recorded events, in emission order.
    pub fn types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| {
                serde_json::to_value(e).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn broadcast(&self, event: ServerEvent) {
        self.events.lock().push(event);
    }
}
