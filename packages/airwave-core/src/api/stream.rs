//! Audio streaming handlers.
//!
//! Separated from the REST handlers due to their distinct concerns: extractor
//! redirects, byte-range file serving, and announcement audio delivery.
//!
//! `/stream/{song_id}` resolves the song's direct URL (cache-first) and
//! 302-redirects the audio element to it; on failure it redirects to a random
//! offline library track so the broadcast stays alive. `/stream-offline/{file}`
//! serves local files with byte-range support; resolved paths must stay
//! inside the library directory.

use std::io::SeekFrom;
use std::path::{Path as FsPath, PathBuf};

use async_stream::stream;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::api::AppState;
use crate::error::{AirwaveError, AirwaveResult};
use crate::protocol_constants::OFFLINE_CHUNK_SIZE;

/// 302 redirect; `Redirect::temporary` would send 307, which makes some
/// audio elements re-POST preflight requests.
fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

/// Content type for a served audio file, by extension.
fn audio_content_type(path: &FsPath) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .as_deref()
    {
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("wav") => "audio/wav",
        _ => "application/octet-stream",
    }
}

/// Parses a `bytes=start-end` range header against a file of `len` bytes.
///
/// Supports open-ended (`bytes=100-`) and suffix (`bytes=-500`) forms.
/// Returns `None` for unsatisfiable or malformed ranges (caller serves the
/// whole file).
fn parse_range(header: &str, len: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;

    if start_str.is_empty() {
        // Suffix form: last N bytes
        let suffix: u64 = end_str.parse().ok()?;
        if suffix == 0 || len == 0 {
            return None;
        }
        return Some((len.saturating_sub(suffix), len - 1));
    }

    let start: u64 = start_str.parse().ok()?;
    let end: u64 = if end_str.is_empty() {
        len.checked_sub(1)?
    } else {
        end_str.parse().ok()?
    };

    if start > end || end >= len {
        return None;
    }
    Some((start, end))
}

/// `GET /stream/{song_id}`: redirect the audio element to the direct URL.
pub(super) async fn stream_song(
    Path(song_id): Path<i64>,
    State(state): State<AppState>,
) -> AirwaveResult<Response> {
    let song = state
        .songs
        .get(song_id)
        .await?
        .ok_or(AirwaveError::SongNotFound(song_id))?;

    match state.resolver.resolve(&song.url).await {
        Ok(url) => {
            log::debug!("[Stream] Redirecting song {} to direct URL", song_id);
            Ok(found(&url))
        }
        Err(e) => {
            log::warn!(
                "[Stream] Resolution failed for song {}, falling back to offline library: {}",
                song_id,
                e
            );
            match state.library.random_track() {
                Some(track) => Ok(found(&format!("/stream-offline/{}", track))),
                None => Err(AirwaveError::Extraction(format!(
                    "no stream URL and offline library is empty: {}",
                    e
                ))),
            }
        }
    }
}

/// `GET /stream-offline/{filename}`: serve a library file with range support.
pub(super) async fn stream_offline(
    Path(filename): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AirwaveResult<Response> {
    let path = state
        .library
        .resolve(&filename)
        .ok_or_else(|| AirwaveError::InvalidRequest(format!("unknown track '{}'", filename)))?;

    serve_file_ranged(path, &headers).await
}

/// `GET /tts/{filename}`: serve a cached announcement rendering.
pub(super) async fn tts_audio(
    Path(filename): Path<String>,
    State(state): State<AppState>,
) -> AirwaveResult<Response> {
    let path = state
        .announcer
        .resolve_cached(&filename)
        .ok_or_else(|| AirwaveError::InvalidRequest(format!("unknown announcement '{}'", filename)))?;

    serve_file_ranged(path, &HeaderMap::new()).await
}

/// Streams a local file, honoring a `Range` header when present.
async fn serve_file_ranged(path: PathBuf, headers: &HeaderMap) -> AirwaveResult<Response> {
    let mut file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| AirwaveError::Internal(format!("open {}: {}", path.display(), e)))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| AirwaveError::Internal(e.to_string()))?
        .len();

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|spec| parse_range(spec, len));

    let (start, end, status) = match range {
        Some((start, end)) => (start, end, StatusCode::PARTIAL_CONTENT),
        None => (0, len.saturating_sub(1), StatusCode::OK),
    };
    let content_length = if len == 0 { 0 } else { end - start + 1 };

    if start > 0 {
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| AirwaveError::Internal(e.to_string()))?;
    }

    let body_stream = stream! {
        let mut remaining = content_length;
        let mut buf = vec![0u8; OFFLINE_CHUNK_SIZE];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            match file.read(&mut buf[..want]).await {
                Ok(0) => break,
                Ok(n) => {
                    remaining -= n as u64;
                    yield Ok::<Bytes, std::io::Error>(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, audio_content_type(&path))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, content_length.to_string());

    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, len),
        );
    }

    builder
        .body(Body::from_stream(body_stream))
        .map_err(|e| AirwaveError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_range_handles_standard_forms() {
        assert_eq!(parse_range("bytes=0-99", 1000), Some((0, 99)));
        assert_eq!(parse_range("bytes=500-", 1000), Some((500, 999)));
        assert_eq!(parse_range("bytes=-100", 1000), Some((900, 999)));
    }

    #[test]
    fn parse_range_rejects_unsatisfiable_requests() {
        assert_eq!(parse_range("bytes=1000-", 1000), None);
        assert_eq!(parse_range("bytes=50-20", 1000), None);
        assert_eq!(parse_range("bytes=0-1000", 1000), None);
        assert_eq!(parse_range("bytes=-0", 1000), None);
        assert_eq!(parse_range("frames=0-10", 1000), None);
        assert_eq!(parse_range("bytes=abc-", 1000), None);
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(audio_content_type(FsPath::new("a.mp3")), "audio/mpeg");
        assert_eq!(audio_content_type(FsPath::new("a.FLAC")), "audio/flac");
        assert_eq!(
            audio_content_type(FsPath::new("a.unknown")),
            "application/octet-stream"
        );
    }
}
