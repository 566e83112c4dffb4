//! Stream URL extraction from the external video platform.
//!
//! The extractor runs as a subprocess (`yt-dlp` by default) and is treated as
//! an opaque function: canonical video URL in, direct audio-only URL out,
//! bounded by a hard timeout. [`StreamResolver`] layers the TTL cache on top
//! so the pre-fetch pipeline and the HTTP streaming endpoint share one
//! cache-first lookup path.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::protocol_constants::{EXTRACT_TIMEOUT, STREAM_URL_SWEEP_INTERVAL, STREAM_URL_TTL};
use crate::utils::canonical_media_url;

/// Errors surfaced by stream URL extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The extractor binary could not be started.
    #[error("extractor could not be spawned: {0}")]
    Spawn(String),

    /// The extractor ran but reported failure.
    #[error("extraction failed: {0}")]
    Failed(String),

    /// The extractor exceeded its deadline.
    #[error("extraction timed out")]
    Timeout,

    /// The extractor succeeded but produced no usable URL.
    #[error("extractor produced no stream URL")]
    NoUrl,
}

/// Convenient Result alias for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Resolves an external video URL to a direct audio stream URL.
///
/// Implementations must strip playlist context themselves if the caller has
/// not; [`StreamResolver`] always canonicalizes before delegating here.
#[async_trait]
pub trait StreamUrlExtractor: Send + Sync {
    async fn resolve(&self, url: &str) -> ExtractResult<String>;
}

/// Extractor shelling out to the `yt-dlp` CLI.
pub struct YtDlpExtractor {
    bin: String,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            timeout: EXTRACT_TIMEOUT,
        }
    }

    /// Overrides the extraction deadline (tests use a short one).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl StreamUrlExtractor for YtDlpExtractor {
    async fn resolve(&self, url: &str) -> ExtractResult<String> {
        let output = Command::new(&self.bin)
            .arg("-f")
            .arg("bestaudio")
            .arg("-g")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| ExtractError::Timeout)?
            .map_err(|e| ExtractError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Failed(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with("http"))
            .map(|line| line.to_string())
            .ok_or(ExtractError::NoUrl)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TTL cache
// ─────────────────────────────────────────────────────────────────────────────

struct CacheEntry {
    stream_url: String,
    expires_at: Instant,
}

/// In-memory map of canonical URL → resolved stream URL with absolute expiry.
///
/// Lost-update races are benign: concurrent writers produce the same URL for
/// the same key under normal conditions.
pub struct StreamUrlCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl StreamUrlCache {
    pub fn new() -> Self {
        Self::with_ttl(STREAM_URL_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns a cached stream URL if present and not expired.
    #[must_use]
    pub fn get(&self, canonical_url: &str) -> Option<String> {
        let entry = self.entries.get(canonical_url)?;
        if entry.expires_at > Instant::now() {
            Some(entry.stream_url.clone())
        } else {
            drop(entry);
            self.entries.remove(canonical_url);
            None
        }
    }

    /// Stores a resolved URL with a fresh expiry.
    pub fn insert(&self, canonical_url: String, stream_url: String) {
        self.entries.insert(
            canonical_url,
            CacheEntry {
                stream_url,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drops expired entries; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Number of live entries (expired-but-unswept included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawns the periodic sweep task; stops when `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STREAM_URL_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            log::debug!("[UrlCache] Swept {} expired entries", removed);
                        }
                    }
                }
            }
        });
    }
}

impl Default for StreamUrlCache {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache-first resolver
// ─────────────────────────────────────────────────────────────────────────────

/// Shared cache-first resolution path.
///
/// Both the pre-fetch pipeline and the `/stream/{song_id}` endpoint resolve
/// through this type, so a URL extracted at T-5m is still warm when the
/// listener's audio element fetches it at T.
pub struct StreamResolver {
    extractor: Arc<dyn StreamUrlExtractor>,
    cache: Arc<StreamUrlCache>,
}

impl StreamResolver {
    pub fn new(extractor: Arc<dyn StreamUrlExtractor>, cache: Arc<StreamUrlCache>) -> Self {
        Self { extractor, cache }
    }

    /// Resolves an external URL, consulting the cache first.
    pub async fn resolve(&self, url: &str) -> ExtractResult<String> {
        let canonical = canonical_media_url(url);

        if let Some(cached) = self.cache.get(&canonical) {
            log::debug!("[Extract] Cache hit for {}", canonical);
            return Ok(cached);
        }

        let stream_url = self.extractor.resolve(&canonical).await?;
        self.cache.insert(canonical, stream_url.clone());
        Ok(stream_url)
    }

    /// Returns the underlying cache (for the sweeper and tests).
    #[must_use]
    pub fn cache(&self) -> &Arc<StreamUrlCache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedExtractor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StreamUrlExtractor for FixedExtractor {
        async fn resolve(&self, url: &str) -> ExtractResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://cdn.example/audio?src={}", url))
        }
    }

    #[test]
    fn cache_expires_entries() {
        let cache = StreamUrlCache::with_ttl(Duration::from_millis(0));
        cache.insert("a".into(), "u".into());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let cache = StreamUrlCache::with_ttl(Duration::from_millis(0));
        cache.insert("a".into(), "u".into());
        cache.insert("b".into(), "u".into());
        assert_eq!(cache.sweep(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn resolver_hits_cache_on_second_lookup() {
        let extractor = Arc::new(FixedExtractor {
            calls: AtomicUsize::new(0),
        });
        let resolver = StreamResolver::new(
            Arc::clone(&extractor) as Arc<dyn StreamUrlExtractor>,
            Arc::new(StreamUrlCache::new()),
        );

        let first = resolver
            .resolve("https://video.example/watch?v=abc&list=PL1")
            .await
            .unwrap();
        let second = resolver
            .resolve("https://video.example/watch?v=abc")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            extractor.calls.load(Ordering::SeqCst),
            1,
            "playlist-stripped URL shares the cache entry"
        );
    }

    #[tokio::test]
    async fn missing_binary_reports_spawn_error() {
        let extractor = YtDlpExtractor::new("definitely-not-a-real-binary-1234")
            .with_timeout(Duration::from_secs(5));
        let err = extractor
            .resolve("https://video.example/watch?v=abc")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Spawn(_)));
    }
}
