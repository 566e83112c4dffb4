//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::api::WsConnectionManager;
use crate::error::{AirwaveError, AirwaveResult};
use crate::events::EventSink;
use crate::extract::{StreamResolver, StreamUrlCache, YtDlpExtractor};
use crate::hub::BroadcastHub;
use crate::protocol_constants::HTTP_CLIENT_TIMEOUT_SECS;
use crate::services::{AdminArbiter, PlaybackController, PrefetchService, Scheduler};
use crate::state::Config;
use crate::store::{
    ChatStore, JsonChatStore, JsonPlaybackStateStore, JsonScheduleStore, JsonSongStore,
    MusicLibrary, PlaybackStateStore, ScheduleStore, SongStore,
};
use crate::tts::{Announcer, HttpTtsClient, TtsClient};

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// It's consumed by `AppState` to build the final application state.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Voting queue store.
    pub songs: Arc<dyn SongStore>,
    /// Schedule store.
    pub schedules: Arc<dyn ScheduleStore>,
    /// Persisted playback singleton.
    pub playback_store: Arc<dyn PlaybackStateStore>,
    /// Chat retention interface (maintenance job).
    pub chat: Arc<dyn ChatStore>,
    /// Offline fallback library.
    pub library: Arc<MusicLibrary>,
    /// Cache-first stream URL resolution.
    pub resolver: Arc<StreamResolver>,
    /// Announcement builder.
    pub announcer: Arc<Announcer>,
    /// Fan-out channel for listener events.
    pub hub: Arc<BroadcastHub>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Pre-fetch pipeline.
    pub prefetch: Arc<PrefetchService>,
    /// Playback controller.
    pub controller: Arc<PlaybackController>,
    /// Cron scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Single-broadcaster arbiter.
    pub arbiter: Arc<AdminArbiter>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Starts the background machinery: schedule jobs, the maintenance job,
    /// and the stream URL cache sweeper.
    pub async fn start_background_tasks(&self) -> AirwaveResult<()> {
        self.resolver.cache().spawn_sweeper(self.cancel_token.clone());
        self.scheduler.initialize().await
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Signal cancellation to all background tasks (schedule jobs,
        // maintenance, cache sweeper, grace timers)
        self.cancel_token.cancel();

        // Close every listener connection
        let connections_closed = self.ws_manager.close_all();
        if connections_closed > 0 {
            log::info!(
                "[Bootstrap] Closed {} WebSocket connection(s)",
                connections_closed
            );
        }

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for TTS and other upstream requests.
///
/// Using a shared client enables connection pooling. This is created once
/// during bootstrap and injected into services that need it.
fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together. The wiring order matters - services are created in
/// dependency order:
///
/// 1. Shared infrastructure (HTTP client, hub, cancellation token)
/// 2. Stores and the offline library
/// 3. Extractor + TTL cache behind the shared resolver
/// 4. Announcer (script templating + TTS cache)
/// 5. Pre-fetch pipeline
/// 6. Playback controller
/// 7. Scheduler and arbiter on top
///
/// # Errors
///
/// Returns an error when the configuration is invalid; everything else is
/// lazy and surfaces at runtime.
pub fn bootstrap_services(config: &Config) -> AirwaveResult<BootstrappedServices> {
    config
        .validate()
        .map_err(AirwaveError::InvalidRequest)?;

    let http_client = create_http_client();
    let cancel_token = CancellationToken::new();

    let hub = Arc::new(BroadcastHub::new(config.event_channel_capacity));
    let ws_manager = Arc::new(WsConnectionManager::new());

    // Stores
    let songs: Arc<dyn SongStore> = Arc::new(JsonSongStore::new(&config.data_dir));
    let schedules: Arc<dyn ScheduleStore> = Arc::new(JsonScheduleStore::new(&config.data_dir));
    let playback_store: Arc<dyn PlaybackStateStore> =
        Arc::new(JsonPlaybackStateStore::new(&config.data_dir));
    let chat: Arc<dyn ChatStore> = Arc::new(JsonChatStore::new(&config.data_dir));
    let library = Arc::new(MusicLibrary::new(&config.library_dir));

    // Stream URL resolution: subprocess extractor behind the TTL cache
    let extractor = Arc::new(YtDlpExtractor::new(&config.extractor_bin));
    let resolver = Arc::new(StreamResolver::new(
        extractor,
        Arc::new(StreamUrlCache::new()),
    ));

    // Announcements: optional TTS endpoint, disk cache, DJ persona
    let tts: Option<Arc<dyn TtsClient>> = config
        .tts_endpoint
        .as_ref()
        .map(|endpoint| {
            Arc::new(HttpTtsClient::new(http_client.clone(), endpoint)) as Arc<dyn TtsClient>
        });
    if tts.is_none() {
        log::info!("[Bootstrap] No TTS endpoint configured; announcements will be text-only");
    }
    let announcer = Arc::new(Announcer::new(
        tts,
        &config.tts_cache_dir,
        &config.dj_name,
    ));

    // Orchestration services
    let prefetch = Arc::new(PrefetchService::new(
        Arc::clone(&schedules),
        Arc::clone(&songs),
        Arc::clone(&resolver),
        Arc::clone(&announcer),
        Arc::clone(&hub) as Arc<dyn EventSink>,
    ));

    let controller = Arc::new(PlaybackController::new(
        Arc::clone(&songs),
        Arc::clone(&schedules),
        Arc::clone(&playback_store),
        Arc::clone(&prefetch),
        Arc::clone(&resolver),
        Arc::clone(&announcer),
        Arc::clone(&library),
        Arc::clone(&hub) as Arc<dyn EventSink>,
    ));

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&schedules),
        Arc::clone(&chat),
        Arc::clone(&controller),
        Arc::clone(&prefetch),
        cancel_token.clone(),
    ));

    let arbiter = Arc::new(AdminArbiter::new(Arc::clone(&controller)));

    Ok(BootstrappedServices {
        songs,
        schedules,
        playback_store,
        chat,
        library,
        resolver,
        announcer,
        hub,
        ws_manager,
        prefetch,
        controller,
        scheduler,
        arbiter,
        http_client,
        cancel_token,
    })
}
