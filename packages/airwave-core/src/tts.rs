//! Spoken DJ announcements: script templating and TTS synthesis.
//!
//! A song with a dedication gets a short spoken introduction before it airs.
//! The script is rendered from a template; audio synthesis goes through the
//! [`TtsClient`] trait and is cached on disk keyed by the MD5 of the script
//! text plus the song id, so re-airing the same dedication never re-renders.
//!
//! Synthesis failure is non-fatal: the announcement degrades to text-only and
//! listeners fall back to client-side speech synthesis.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Announcement, Song};
use crate::protocol_constants::TTS_TIMEOUT;

/// Errors surfaced by TTS synthesis.
#[derive(Debug, Error)]
pub enum TtsError {
    /// The TTS endpoint could not be reached.
    #[error("TTS request failed: {0}")]
    Http(String),

    /// The endpoint answered but synthesis failed.
    #[error("TTS synthesis failed: {0}")]
    Synthesis(String),

    /// The rendered audio could not be cached on disk.
    #[error("TTS cache write failed: {0}")]
    Cache(String),
}

/// Convenient Result alias for TTS operations.
pub type TtsResult<T> = Result<T, TtsError>;

/// Renders text to audio bytes.
#[async_trait]
pub trait TtsClient: Send + Sync {
    async fn synthesize(&self, text: &str) -> TtsResult<Vec<u8>>;
}

/// TTS client posting to an HTTP synthesis endpoint.
pub struct HttpTtsClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTtsClient {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TtsClient for HttpTtsClient {
    async fn synthesize(&self, text: &str) -> TtsResult<Vec<u8>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "text": text }))
            .timeout(TTS_TIMEOUT)
            .send()
            .await
            .map_err(|e| TtsError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TtsError::Synthesis(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TtsError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Announcer
// ─────────────────────────────────────────────────────────────────────────────

/// Introduction templates; `{dj}`, `{title}`, `{artist}`, `{dedication}` are
/// substituted. Template choice is keyed on the song id so the same song gets
/// the same script (and thus the same cache entry) on every attempt.
const SCRIPT_TEMPLATES: [&str; 3] = [
    "This is {dj}. Up next: {title} by {artist}. It comes with a dedication: {dedication}",
    "{dj} here. Someone asked for {title} by {artist}, with the words: {dedication}",
    "You're listening to {dj}. The next song is {title} by {artist}, dedicated: {dedication}",
];

/// Builds spoken introductions for dedicated songs.
pub struct Announcer {
    tts: Option<Arc<dyn TtsClient>>,
    cache_dir: PathBuf,
    dj_name: String,
}

impl Announcer {
    pub fn new(
        tts: Option<Arc<dyn TtsClient>>,
        cache_dir: impl Into<PathBuf>,
        dj_name: impl Into<String>,
    ) -> Self {
        Self {
            tts,
            cache_dir: cache_dir.into(),
            dj_name: dj_name.into(),
        }
    }

    /// Renders the spoken script for a dedicated song.
    #[must_use]
    pub fn script(&self, song: &Song, dedication: &str) -> String {
        let template = SCRIPT_TEMPLATES[(song.id.unsigned_abs() as usize) % SCRIPT_TEMPLATES.len()];
        template
            .replace("{dj}", &self.dj_name)
            .replace("{title}", &song.title)
            .replace("{artist}", &song.artist)
            .replace("{dedication}", dedication)
    }

    /// Cache file name for a script: MD5 of the script text plus the song id.
    #[must_use]
    pub fn cache_file_name(script: &str, song_id: i64) -> String {
        let digest = md5::compute(format!("{}:{}", song_id, script));
        format!("{:x}.mp3", digest)
    }

    /// Builds the announcement for a song, or `None` when it carries no
    /// dedication.
    ///
    /// Never fails: if synthesis or caching fails, the announcement is
    /// returned text-only and the failure is logged.
    pub async fn announce(&self, song: &Song) -> Option<Announcement> {
        let dedication = song.dedication.as_deref()?.trim();
        if dedication.is_empty() {
            return None;
        }

        let text = self.script(song, dedication);
        let audio_url = match self.render_audio(&text, song.id).await {
            Ok(url) => url,
            Err(e) => {
                log::warn!(
                    "[Announcer] Synthesis failed for song {}, falling back to text-only: {}",
                    song.id,
                    e
                );
                None
            }
        };

        Some(Announcement { text, audio_url })
    }

    /// Renders (or reuses) the cached audio file; returns its serving URL.
    async fn render_audio(&self, text: &str, song_id: i64) -> TtsResult<Option<String>> {
        let Some(tts) = &self.tts else {
            return Ok(None);
        };

        let file_name = Self::cache_file_name(text, song_id);
        let path = self.cache_dir.join(&file_name);
        let url = format!("/tts/{}", file_name);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            log::debug!("[Announcer] Cache hit for song {}", song_id);
            return Ok(Some(url));
        }

        let audio = tts.synthesize(text).await?;

        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| TtsError::Cache(e.to_string()))?;
        tokio::fs::write(&path, &audio)
            .await
            .map_err(|e| TtsError::Cache(e.to_string()))?;

        log::info!(
            "[Announcer] Rendered announcement for song {} ({} bytes)",
            song_id,
            audio.len()
        );
        Ok(Some(url))
    }

    /// Resolves a cached announcement file name to a path inside the cache
    /// directory; rejects traversal.
    #[must_use]
    pub fn resolve_cached(&self, file_name: &str) -> Option<PathBuf> {
        let root = self.cache_dir.canonicalize().ok()?;
        let candidate = root.join(file_name).canonicalize().ok()?;
        if candidate.starts_with(&root) && candidate.is_file() {
            Some(candidate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn dedicated_song(id: i64) -> Song {
        Song {
            id,
            title: "Karma Police".into(),
            artist: "Radiohead".into(),
            url: "https://video.example/watch?v=k".into(),
            video_id: "k".into(),
            duration_secs: 260,
            thumbnail_url: String::new(),
            dedication: Some("for Sam, happy birthday".into()),
            vote_count: 1,
            starred: false,
            added_at: Utc::now(),
            played: false,
            played_at: None,
        }
    }

    struct FailingTts;

    #[async_trait]
    impl TtsClient for FailingTts {
        async fn synthesize(&self, _text: &str) -> TtsResult<Vec<u8>> {
            Err(TtsError::Synthesis("voice model unavailable".into()))
        }
    }

    struct FixedTts;

    #[async_trait]
    impl TtsClient for FixedTts {
        async fn synthesize(&self, _text: &str) -> TtsResult<Vec<u8>> {
            Ok(b"ID3-audio".to_vec())
        }
    }

    #[test]
    fn script_substitutes_all_fields() {
        let announcer = Announcer::new(None, "/tmp/unused", "Night Owl");
        let song = dedicated_song(1);
        let script = announcer.script(&song, "for Sam, happy birthday");
        assert!(script.contains("Night Owl"));
        assert!(script.contains("Karma Police"));
        assert!(script.contains("Radiohead"));
        assert!(script.contains("for Sam"));
    }

    #[test]
    fn cache_name_is_stable_per_script_and_song() {
        let a = Announcer::cache_file_name("hello", 1);
        let b = Announcer::cache_file_name("hello", 1);
        let c = Announcer::cache_file_name("hello", 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".mp3"));
    }

    #[tokio::test]
    async fn no_dedication_means_no_announcement() {
        let announcer = Announcer::new(None, "/tmp/unused", "DJ");
        let mut song = dedicated_song(1);
        song.dedication = None;
        assert!(announcer.announce(&song).await.is_none());

        song.dedication = Some("   ".into());
        assert!(announcer.announce(&song).await.is_none());
    }

    #[tokio::test]
    async fn synthesis_failure_degrades_to_text_only() {
        let dir = TempDir::new().unwrap();
        let announcer = Announcer::new(Some(Arc::new(FailingTts)), dir.path(), "DJ");
        let announcement = announcer.announce(&dedicated_song(1)).await.unwrap();
        assert!(announcement.audio_url.is_none());
        assert!(!announcement.text.is_empty());
    }

    #[tokio::test]
    async fn successful_synthesis_writes_cache_and_reuses_it() {
        let dir = TempDir::new().unwrap();
        let announcer = Announcer::new(Some(Arc::new(FixedTts)), dir.path(), "DJ");
        let song = dedicated_song(3);

        let first = announcer.announce(&song).await.unwrap();
        let url = first.audio_url.clone().unwrap();
        assert!(url.starts_with("/tts/"));

        let file_name = url.strip_prefix("/tts/").unwrap();
        assert!(dir.path().join(file_name).is_file());

        // Second run must hit the disk cache, not re-render
        let second = announcer.announce(&song).await.unwrap();
        assert_eq!(second.audio_url.unwrap(), url);
    }

    #[tokio::test]
    async fn resolve_cached_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let announcer = Announcer::new(Some(Arc::new(FixedTts)), dir.path(), "DJ");
        announcer.announce(&dedicated_song(4)).await.unwrap();

        assert!(announcer.resolve_cached("../etc/passwd").is_none());
    }
}
