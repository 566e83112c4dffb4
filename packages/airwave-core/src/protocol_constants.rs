//! Fixed orchestration constants that should NOT be changed casually.
//!
//! These values define the timing contract between the scheduler, the
//! pre-fetch pipeline, and connected clients. Changing them shifts observable
//! broadcast behavior (lock notices, replay windows, re-entrancy guards).

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Scheduling
// ─────────────────────────────────────────────────────────────────────────────

/// How far ahead of a schedule's main firing the pre-fetch job runs.
///
/// Five minutes gives the extractor and TTS synthesis time to finish well
/// before airtime even on a slow upstream.
pub const PREFETCH_LEAD: Duration = Duration::from_secs(5 * 60);

/// Total wall-clock budget for one pre-fetch run.
///
/// Pre-fetch fires at T-5m; a slot that has not completed by T-1m is treated
/// as failed and replaced with the offline fallback.
pub const PREFETCH_BUDGET: Duration = Duration::from_secs(4 * 60);

/// Re-entrancy guard for scheduled firings.
///
/// If a schedule's `last_run` is within this window when the cron fires, the
/// firing is skipped. Covers the admin playing a locked slot manually shortly
/// before its cron time.
pub const SCHEDULE_RERUN_GUARD: Duration = Duration::from_secs(10 * 60);

/// Local-time cron of the daily maintenance job (chat pruning).
pub const MAINTENANCE_CRON: &str = "30 4 * * *";

/// Retention window for chat messages, enforced by the maintenance job.
pub const CHAT_RETENTION: Duration = Duration::from_secs(3 * 24 * 3600);

/// Valid burst size range for a schedule (`song_count`).
pub const MIN_SONG_COUNT: u32 = 1;
pub const MAX_SONG_COUNT: u32 = 10;

/// Upper bound of the volume range for schedules and playback state.
pub const MAX_VOLUME: u8 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// External I/O deadlines
// ─────────────────────────────────────────────────────────────────────────────

/// Hard timeout for resolving a direct stream URL through the extractor.
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(90);

/// Hard timeout for extractor metadata calls.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for TTS synthesis requests.
pub const TTS_TIMEOUT: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────────────────
// Caches
// ─────────────────────────────────────────────────────────────────────────────

/// Lifetime of a resolved stream URL in the in-memory cache.
///
/// Upstream URLs are signed and typically live ~6h; we refresh conservatively
/// so a stale link is never handed to a listener's audio element.
pub const STREAM_URL_TTL: Duration = Duration::from_secs(5 * 60);

/// Interval of the stream URL cache sweep task.
pub const STREAM_URL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum age of a cached play event before `get-playback-state` stops
/// replaying it to a reconnecting broadcaster.
pub const PLAYBACK_CACHE_MAX_AGE: Duration = Duration::from_secs(10 * 60);

// ─────────────────────────────────────────────────────────────────────────────
// Broadcaster arbitration
// ─────────────────────────────────────────────────────────────────────────────

/// Grace window after an admin disconnect during which the same user may
/// reattach without a takeover.
pub const ADMIN_GRACE: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the event broadcast channel for WebSocket clients.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// WebSocket heartbeat timeout (seconds).
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Interval between WebSocket heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 1;

/// Timeout for shared HTTP client requests (TTS and friends).
pub const HTTP_CLIENT_TIMEOUT_SECS: u64 = 30;

/// Chunk size for serving offline library files.
pub const OFFLINE_CHUNK_SIZE: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name reported by the health endpoint and log banners.
pub const APP_NAME: &str = "Airwave";

/// Service identifier used by clients probing /api/health.
pub const SERVICE_ID: &str = "airwave";
