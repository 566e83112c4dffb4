//! Domain entities shared across the orchestration core.
//!
//! Persisted entities ([`Song`], [`Schedule`], [`PlaybackState`]) are owned by
//! their stores; the core reads them through the `store` traits and writes
//! back only the fields called out in the store contracts. In-memory entities
//! ([`PreparedSlot`], [`Announcement`]) live inside the services that own them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A song in the voting queue.
///
/// `played` means "removed from the visible queue". A song reserved by the
/// pre-fetch pipeline has `played = true` with `played_at = None`; only an
/// actual airing sets `played_at`. The recently-played query filters on
/// `played_at`, so reservations never show up there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: i64,
    pub title: String,
    pub artist: String,
    /// Canonical URL on the external video platform.
    pub url: String,
    /// External platform video id.
    pub video_id: String,
    /// Duration in seconds, as reported by the platform.
    pub duration_secs: u32,
    pub thumbnail_url: String,
    /// Optional dedication text; triggers a spoken DJ introduction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedication: Option<String>,
    pub vote_count: i64,
    pub starred: bool,
    pub added_at: DateTime<Utc>,
    pub played: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub played_at: Option<DateTime<Utc>>,
}

impl Song {
    /// Compact descriptor used in lock notices and queue events.
    #[must_use]
    pub fn summary(&self) -> SongSummary {
        SongSummary {
            id: self.id,
            title: self.title.clone(),
            artist: self.artist.clone(),
            thumbnail_url: self.thumbnail_url.clone(),
            duration_secs: self.duration_secs,
        }
    }
}

/// Compact song descriptor sent to clients that only render a label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SongSummary {
    pub id: i64,
    pub title: String,
    pub artist: String,
    pub thumbnail_url: String,
    pub duration_secs: u32,
}

/// A recurring broadcast slot driven by a cron expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: i64,
    pub name: String,
    /// Five-field cron expression (min hr dom mon dow), local time.
    pub cron_expr: String,
    /// Playback volume for this slot (0-100).
    pub volume: u8,
    /// Number of songs aired per firing (1-10).
    pub song_count: u32,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
}

/// The persisted playback singleton.
///
/// Exactly one row exists; the store's `get_current` is a find-or-create.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_song_id: Option<i64>,
    pub playing: bool,
    pub volume: u8,
    pub position_seconds: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_song_id: None,
            playing: false,
            volume: 80,
            position_seconds: 0.0,
        }
    }
}

/// A spoken DJ introduction prepared for a dedicated song.
///
/// `audio_url` is present when TTS synthesis succeeded; absent means clients
/// fall back to client-side speech synthesis of `text`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

/// A pre-fetched slot committed to an upcoming schedule firing.
///
/// Created by the pre-fetch pipeline at T-5m, consumed by the playback
/// controller at T. An offline-fallback slot carries no song reservation.
#[derive(Debug, Clone)]
pub struct PreparedSlot {
    pub song: Option<Song>,
    pub stream_url: Option<String>,
    pub announcement: Option<Announcement>,
    pub is_offline_fallback: bool,
    pub prepared_at: DateTime<Utc>,
}

impl PreparedSlot {
    /// A ready slot holding a reserved, streamable song.
    #[must_use]
    pub fn ready(song: Song, stream_url: String, announcement: Option<Announcement>) -> Self {
        Self {
            song: Some(song),
            stream_url: Some(stream_url),
            announcement,
            is_offline_fallback: false,
            prepared_at: Utc::now(),
        }
    }

    /// An offline-fallback slot; the controller plays a local library track.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            song: None,
            stream_url: None,
            announcement: None,
            is_offline_fallback: true,
            prepared_at: Utc::now(),
        }
    }
}
