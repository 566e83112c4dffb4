//! Event system for real-time listener communication.
//!
//! This module provides:
//! - [`ServerEvent`]: the closed set of events the server sends to clients
//! - [`EventSink`] trait for domain services to emit events
//!
//! The actual transport (WebSocket fan-out) is handled separately by
//! [`BroadcastHub`](crate::hub::BroadcastHub) in the `hub` module. Event
//! names on the wire are kebab-case, matching what clients subscribe to.

mod sink;

pub use sink::{EventSink, LoggingEventSink, NoopEventSink};

use serde::{Deserialize, Serialize};

use crate::model::{Song, SongSummary};

/// Events broadcast (or directed) to clients.
///
/// One variant per wire event; unknown variants do not exist by construction.
/// Payload fields are camelCase on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A song starts playing for every listener.
    PlaySong { payload: PlayPayload },

    /// Like `play-song`, but preceded by a spoken DJ introduction.
    PlayAnnouncement { payload: AnnouncementPayload },

    /// The visible queue changed; clients should redraw it.
    QueueUpdated,

    /// The recently-played list changed.
    RecentlyPlayedUpdated,

    /// Playback paused by the broadcaster.
    PlaybackPaused,

    /// Playback resumed by the broadcaster.
    PlaybackResumed,

    /// Broadcast volume changed.
    VolumeChanged { payload: VolumePayload },

    /// Playback stopped; clients return to the idle state.
    PlaybackStopped,

    /// The current song (and any burst) finished with nothing queued next.
    SongEnded { payload: SongEndedPayload },

    /// The next scheduled song has been locked in (or the slot went offline).
    NextSongLocked { payload: LockedPayload },

    /// Metadata refresh for what is currently on air. Sent when the
    /// broadcaster confirms a song started; never restarts client playback.
    SongPlayingUpdate { payload: SongPlayingPayload },

    /// Reply carrying the currently playing song, if any.
    CurrentSong { payload: CurrentSongPayload },

    /// The receiving connection is now the active broadcaster.
    AdminActive,

    /// A broadcaster already exists; the receiving connection was not installed.
    AdminRejected { payload: AdminRejectedPayload },

    /// Takeover granted; carries what the displaced broadcaster was playing.
    TakeoverWarning { payload: TakeoverPayload },

    /// The receiving connection has been displaced and will be closed.
    ForceDisconnect,
}

/// Payload for `play-song`.
///
/// `song` is absent when an offline library track airs (there is no queue
/// entry to describe); `stream_url` alone drives the client's audio element.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song: Option<Song>,
    pub stream_url: String,
    pub volume: u8,
    /// When true the broadcaster chains into the next burst song on end.
    pub auto_next: bool,
    /// Set on replays to a reconnecting broadcaster so the client resumes
    /// near the prior position instead of starting over.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_reconnect: bool,
}

/// Payload for `play-announcement`: the play payload plus the spoken intro.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementPayload {
    #[serde(flatten)]
    pub play: PlayPayload,
    pub announcement_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announcement_audio_url: Option<String>,
}

/// Payload for `volume-changed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumePayload {
    pub volume: u8,
}

/// Payload for `song-ended`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SongEndedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_id: Option<i64>,
}

/// Payload for `next-song-locked`.
///
/// `song` is absent for offline slots. `schedule_time` is the main firing
/// rendered as local HH:MM for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LockedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song: Option<SongSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_announcement: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_offline: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub download_failed: bool,
}

/// Payload for `song-playing-update`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SongPlayingPayload {
    pub song: Song,
    /// Unix timestamp in milliseconds when the broadcaster confirmed the start.
    pub timestamp: u64,
}

/// Payload for `current-song`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSongPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song: Option<Song>,
}

/// Payload for `admin-rejected`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminRejectedPayload {
    pub song_playing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_song: Option<Song>,
}

/// Payload for `takeover-warning`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TakeoverPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_song: Option<Song>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_kebab_case_tags() {
        let event = ServerEvent::QueueUpdated;
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "queue-updated");

        let event = ServerEvent::NextSongLocked {
            payload: LockedPayload {
                song: None,
                schedule_time: Some("17:00".into()),
                has_announcement: false,
                is_offline: true,
                download_failed: true,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "next-song-locked");
        assert_eq!(json["payload"]["isOffline"], true);
        assert_eq!(json["payload"]["downloadFailed"], true);
    }

    #[test]
    fn reconnect_flag_is_omitted_when_false() {
        let song: Song = serde_json::from_value(serde_json::json!({
            "id": 1, "title": "t", "artist": "a", "url": "u", "videoId": "v",
            "durationSecs": 10, "thumbnailUrl": "th", "voteCount": 0,
            "starred": false, "addedAt": "2026-01-01T00:00:00Z", "played": false
        }))
        .unwrap();
        let event = ServerEvent::PlaySong {
            payload: PlayPayload {
                song: Some(song),
                stream_url: "http://cdn/a".into(),
                volume: 70,
                auto_next: false,
                is_reconnect: false,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["payload"].get("isReconnect").is_none());
        assert_eq!(json["payload"]["autoNext"], false);
    }
}
