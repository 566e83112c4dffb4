//! Core application configuration.
//!
//! Provides the validated [`Config`] consumed by bootstrap. Runtime state
//! lives inside the services that own it (prepared slots in the pre-fetch
//! pipeline, burst state in the playback controller, the admin session in
//! the arbiter).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the Airwave core.
///
/// All fields have sensible defaults; the server binary overrides them from
/// YAML and CLI flags.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    // Server
    /// Preferred port for the HTTP/WS server (0 = auto-allocate).
    pub preferred_port: u16,

    // Paths
    /// Directory for persisted stores (songs, schedules, playback state).
    pub data_dir: PathBuf,

    /// Directory of local audio files used as offline fallback.
    pub library_dir: PathBuf,

    /// Directory for cached TTS renderings.
    pub tts_cache_dir: PathBuf,

    // External tools
    /// Extractor binary resolving platform URLs to direct audio URLs.
    pub extractor_bin: String,

    /// TTS endpoint; `None` disables audio synthesis (announcements degrade
    /// to text-only and clients use client-side speech synthesis).
    pub tts_endpoint: Option<String>,

    /// Name the DJ introduces itself with in announcement scripts.
    pub dj_name: String,

    // Transport
    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,

    /// WebSocket heartbeat timeout (seconds).
    pub ws_heartbeat_timeout_secs: u64,

    /// Interval between WebSocket heartbeat checks (seconds).
    pub ws_heartbeat_check_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: 0,
            data_dir: PathBuf::from("data"),
            library_dir: PathBuf::from("library"),
            tts_cache_dir: PathBuf::from("data/tts-cache"),
            extractor_bin: "yt-dlp".to_string(),
            tts_endpoint: None,
            dj_name: "Airwave".to_string(),
            event_channel_capacity: crate::protocol_constants::EVENT_CHANNEL_CAPACITY,
            ws_heartbeat_timeout_secs: crate::protocol_constants::WS_HEARTBEAT_TIMEOUT_SECS,
            ws_heartbeat_check_interval_secs:
                crate::protocol_constants::WS_HEARTBEAT_CHECK_INTERVAL_SECS,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        if self.ws_heartbeat_timeout_secs == 0 {
            return Err("ws_heartbeat_timeout_secs must be >= 1".to_string());
        }
        if self.extractor_bin.is_empty() {
            return Err("extractor_bin must not be empty".to_string());
        }
        Ok(())
    }
}
