//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, Utc};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Renders a UTC instant as local wall-clock `HH:MM` for lock notices.
#[must_use]
pub fn format_local_hhmm(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Canonicalization
// ─────────────────────────────────────────────────────────────────────────────

/// Query parameters that tie a video URL to a playlist context.
///
/// The extractor must resolve the single video, not the playlist it was
/// clicked from, so these are stripped before extraction and cache lookup.
const PLAYLIST_PARAMS: [&str; 3] = ["list", "index", "start_radio"];

/// Strips playlist parameters from an external video URL.
///
/// Leaves all other query parameters (notably the video id) untouched and
/// preserves their order. Returns the input unchanged when there is no query
/// string.
#[must_use]
pub fn canonical_media_url(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or("");
            !PLAYLIST_PARAMS.contains(&key)
        })
        .collect();

    if kept.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, kept.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_url_strips_playlist_params() {
        assert_eq!(
            canonical_media_url("https://video.example/watch?v=abc&list=PL123&index=4"),
            "https://video.example/watch?v=abc"
        );
    }

    #[test]
    fn canonical_url_keeps_video_id_only_query() {
        assert_eq!(
            canonical_media_url("https://video.example/watch?v=abc"),
            "https://video.example/watch?v=abc"
        );
    }

    #[test]
    fn canonical_url_without_query_is_unchanged() {
        assert_eq!(
            canonical_media_url("https://video.example/shorts/abc"),
            "https://video.example/shorts/abc"
        );
    }

    #[test]
    fn canonical_url_drops_query_when_all_params_stripped() {
        assert_eq!(
            canonical_media_url("https://video.example/watch?list=PL123"),
            "https://video.example/watch"
        );
    }

    #[test]
    fn format_local_hhmm_is_zero_padded() {
        let formatted = format_local_hhmm(Utc::now());
        assert_eq!(formatted.len(), 5);
        assert_eq!(formatted.as_bytes()[2], b':');
    }
}
