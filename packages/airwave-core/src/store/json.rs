//! JSON-file-backed store implementations.
//!
//! Each store owns one file under the data directory and serializes access
//! with an in-process lock. Writes are atomic (temp file + rename) to prevent
//! corruption on crash. This backend suits a single-process server; the core
//! only ever sees the traits, so swapping in a database later is local to
//! this module.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    ChatStore, PlaybackStateStore, ScheduleStore, SongStore, StoreError, StoreResult,
};
use crate::model::{PlaybackState, Schedule, Song};

/// Reads a JSON collection file, treating a missing file as empty.
fn load_file<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt(e.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

/// Writes a JSON file atomically (temp file + rename).
fn save_file<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents =
        serde_json::to_string_pretty(value).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, contents)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Queue selection order: `starred DESC, vote_count DESC, added_at ASC`.
fn queue_order(a: &Song, b: &Song) -> Ordering {
    b.starred
        .cmp(&a.starred)
        .then(b.vote_count.cmp(&a.vote_count))
        .then(a.added_at.cmp(&b.added_at))
}

// ─────────────────────────────────────────────────────────────────────────────
// Songs
// ─────────────────────────────────────────────────────────────────────────────

/// Song store backed by `songs.json`.
pub struct JsonSongStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonSongStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("songs.json"),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> StoreResult<Vec<Song>> {
        load_file(&self.path)
    }

    fn mutate_song<F>(&self, id: i64, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Song),
    {
        let _guard = self.lock.lock();
        let mut songs = self.load()?;
        let song = songs
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("song {}", id)))?;
        f(song);
        save_file(&self.path, &songs)
    }
}

#[async_trait]
impl SongStore for JsonSongStore {
    async fn top_unplayed(&self) -> StoreResult<Option<Song>> {
        let _guard = self.lock.lock();
        let mut songs: Vec<Song> = self.load()?.into_iter().filter(|s| !s.played).collect();
        songs.sort_by(queue_order);
        Ok(songs.into_iter().next())
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Song>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.into_iter().find(|s| s.id == id))
    }

    async fn queue(&self) -> StoreResult<Vec<Song>> {
        let _guard = self.lock.lock();
        let mut songs: Vec<Song> = self.load()?.into_iter().filter(|s| !s.played).collect();
        songs.sort_by(queue_order);
        Ok(songs)
    }

    async fn recently_played(&self, limit: usize) -> StoreResult<Vec<Song>> {
        let _guard = self.lock.lock();
        let mut aired: Vec<Song> = self
            .load()?
            .into_iter()
            .filter(|s| s.played_at.is_some())
            .collect();
        aired.sort_by(|a, b| b.played_at.cmp(&a.played_at));
        aired.truncate(limit);
        Ok(aired)
    }

    async fn reserve(&self, id: i64) -> StoreResult<()> {
        self.mutate_song(id, |song| {
            song.played = true;
            song.played_at = None;
        })
    }

    async fn mark_aired(&self, id: i64) -> StoreResult<()> {
        self.mutate_song(id, |song| {
            song.played = true;
            song.played_at = Some(Utc::now());
        })
    }

    async fn restore(&self, id: i64) -> StoreResult<()> {
        self.mutate_song(id, |song| {
            song.played = false;
            song.played_at = None;
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Schedules
// ─────────────────────────────────────────────────────────────────────────────

/// Schedule store backed by `schedules.json`.
pub struct JsonScheduleStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonScheduleStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("schedules.json"),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> StoreResult<Vec<Schedule>> {
        load_file(&self.path)
    }

    fn mutate_schedule<F>(&self, id: i64, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Schedule),
    {
        let _guard = self.lock.lock();
        let mut schedules = self.load()?;
        let schedule = schedules
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("schedule {}", id)))?;
        f(schedule);
        save_file(&self.path, &schedules)
    }
}

#[async_trait]
impl ScheduleStore for JsonScheduleStore {
    async fn list(&self) -> StoreResult<Vec<Schedule>> {
        let _guard = self.lock.lock();
        self.load()
    }

    async fn list_active(&self) -> StoreResult<Vec<Schedule>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.into_iter().filter(|s| s.active).collect())
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Schedule>> {
        let _guard = self.lock.lock();
        Ok(self.load()?.into_iter().find(|s| s.id == id))
    }

    async fn create(&self, mut schedule: Schedule) -> StoreResult<Schedule> {
        let _guard = self.lock.lock();
        let mut schedules = self.load()?;
        schedule.id = schedules.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        schedules.push(schedule.clone());
        save_file(&self.path, &schedules)?;
        Ok(schedule)
    }

    async fn update(&self, schedule: Schedule) -> StoreResult<()> {
        let id = schedule.id;
        self.mutate_schedule(id, |existing| *existing = schedule)
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        let _guard = self.lock.lock();
        let mut schedules = self.load()?;
        let before = schedules.len();
        schedules.retain(|s| s.id != id);
        if schedules.len() == before {
            return Err(StoreError::NotFound(format!("schedule {}", id)));
        }
        save_file(&self.path, &schedules)
    }

    async fn set_last_run(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        self.mutate_schedule(id, |s| s.last_run = Some(at))
    }

    async fn set_next_run(&self, id: i64, at: Option<DateTime<Utc>>) -> StoreResult<()> {
        self.mutate_schedule(id, |s| s.next_run = at)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback state
// ─────────────────────────────────────────────────────────────────────────────

/// Playback singleton backed by `playback.json`.
///
/// `get_current` is a find-or-create: a missing file yields the default row.
pub struct JsonPlaybackStateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonPlaybackStateStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("playback.json"),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl PlaybackStateStore for JsonPlaybackStateStore {
    async fn get_current(&self) -> StoreResult<PlaybackState> {
        let _guard = self.lock.lock();
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| StoreError::Corrupt(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let state = PlaybackState::default();
                save_file(&self.path, &state)?;
                Ok(state)
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn save(&self, state: &PlaybackState) -> StoreResult<()> {
        let _guard = self.lock.lock();
        save_file(&self.path, state)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat retention
// ─────────────────────────────────────────────────────────────────────────────

/// Minimal message shape for the retention pass; the chat feature itself
/// lives outside the core and owns the full schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    id: i64,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
    sent_at: DateTime<Utc>,
}

/// Chat store backed by `chat.json`; only retention is implemented here.
pub struct JsonChatStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonChatStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("chat.json"),
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ChatStore for JsonChatStore {
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let _guard = self.lock.lock();
        let mut messages: Vec<ChatMessage> = load_file(&self.path)?;
        let before = messages.len();
        messages.retain(|m| m.sent_at >= cutoff);
        let removed = before - messages.len();
        if removed > 0 {
            save_file(&self.path, &messages)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn song(id: i64, votes: i64, starred: bool, added_offset_secs: i64) -> Song {
        Song {
            id,
            title: format!("Song {}", id),
            artist: "Artist".into(),
            url: format!("https://video.example/watch?v=v{}", id),
            video_id: format!("v{}", id),
            duration_secs: 180,
            thumbnail_url: String::new(),
            dedication: None,
            vote_count: votes,
            starred,
            added_at: Utc::now() + Duration::seconds(added_offset_secs),
            played: false,
            played_at: None,
        }
    }

    fn seeded_store(dir: &TempDir, songs: &[Song]) -> JsonSongStore {
        let store = JsonSongStore::new(dir.path());
        save_file(&store.path, &songs.to_vec()).unwrap();
        store
    }

    #[tokio::test]
    async fn top_unplayed_orders_by_starred_votes_age() {
        let dir = TempDir::new().unwrap();
        // b has more votes, but c is starred; a is oldest
        let store = seeded_store(
            &dir,
            &[song(1, 3, false, 0), song(2, 5, false, 1), song(3, 0, true, 2)],
        );

        let top = store.top_unplayed().await.unwrap().unwrap();
        assert_eq!(top.id, 3, "starred song wins regardless of votes");
    }

    #[tokio::test]
    async fn vote_tie_breaks_by_added_at() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir, &[song(1, 2, false, 10), song(2, 2, false, 0)]);

        let top = store.top_unplayed().await.unwrap().unwrap();
        assert_eq!(top.id, 2, "older submission wins a vote tie");
    }

    #[tokio::test]
    async fn reservation_hides_song_without_airing_it() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir, &[song(1, 2, false, 0)]);

        store.reserve(1).await.unwrap();
        assert!(store.top_unplayed().await.unwrap().is_none());
        assert!(store.recently_played(10).await.unwrap().is_empty());

        store.restore(1).await.unwrap();
        assert_eq!(store.top_unplayed().await.unwrap().unwrap().id, 1);
    }

    #[tokio::test]
    async fn airing_stamps_played_at() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir, &[song(1, 2, false, 0)]);

        store.mark_aired(1).await.unwrap();
        let recent = store.recently_played(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].played_at.is_some());
    }

    #[tokio::test]
    async fn schedule_create_assigns_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonScheduleStore::new(dir.path());

        let schedule = Schedule {
            id: 0,
            name: "Evening".into(),
            cron_expr: "0 17 * * 1-5".into(),
            volume: 70,
            song_count: 1,
            active: true,
            last_run: None,
            next_run: None,
        };
        let first = store.create(schedule.clone()).await.unwrap();
        let second = store.create(schedule).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(store.list_active().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn playback_get_current_is_find_or_create() {
        let dir = TempDir::new().unwrap();
        let store = JsonPlaybackStateStore::new(dir.path());

        let state = store.get_current().await.unwrap();
        assert_eq!(state, PlaybackState::default());

        let updated = PlaybackState {
            current_song_id: Some(9),
            playing: true,
            volume: 55,
            position_seconds: 12.5,
        };
        store.save(&updated).await.unwrap();
        assert_eq!(store.get_current().await.unwrap(), updated);
    }

    #[tokio::test]
    async fn chat_retention_removes_only_old_messages() {
        let dir = TempDir::new().unwrap();
        let store = JsonChatStore::new(dir.path());
        let now = Utc::now();
        let messages = vec![
            ChatMessage {
                id: 1,
                rest: Default::default(),
                sent_at: now - Duration::days(5),
            },
            ChatMessage {
                id: 2,
                rest: Default::default(),
                sent_at: now,
            },
        ];
        save_file(&store.path, &messages).unwrap();

        let removed = store
            .delete_older_than(now - Duration::days(3))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let remaining: Vec<ChatMessage> = load_file(&store.path).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, 2);
    }
}
