//! Playback controller: the authoritative source of "what plays next".
//!
//! Responsibilities:
//! - Consume prepared slots when schedules fire (with a re-entrancy guard)
//! - Chain multi-song bursts through `on_song_ended`
//! - Handle manual broadcaster commands (next, specific, pause, resume,
//!   volume, stop)
//! - Track what is on air and cache the last play event for reconnects
//!
//! All mutations of the persisted playback singleton, the burst state and the
//! now-playing metadata go through this service.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::error::{AirwaveError, AirwaveResult};
use crate::events::{
    AnnouncementPayload, EventSink, PlayPayload, ServerEvent, SongEndedPayload, SongPlayingPayload,
    VolumePayload,
};
use crate::extract::StreamResolver;
use crate::model::{Announcement, PlaybackState, PreparedSlot, Schedule, Song};
use crate::protocol_constants::{MAX_VOLUME, PLAYBACK_CACHE_MAX_AGE, SCHEDULE_RERUN_GUARD};
use crate::services::prefetch::PrefetchService;
use crate::services::scheduler::next_firing;
use crate::store::{MusicLibrary, PlaybackStateStore, ScheduleStore, SongStore};
use crate::tts::Announcer;
use crate::utils::now_millis;

/// Multi-song burst progress for the schedule currently on air.
#[derive(Default)]
struct ScheduleRunState {
    remaining_in_burst: u32,
    next_song_prepared: Option<PreparedSlot>,
}

/// The last play event emitted, kept for replay to a reconnecting broadcaster.
#[derive(Clone)]
struct CachedPlay {
    event: ServerEvent,
    cached_at: Instant,
}

/// Owns playback state, burst chaining and the now-playing caches.
pub struct PlaybackController {
    songs: Arc<dyn SongStore>,
    schedules: Arc<dyn ScheduleStore>,
    playback: Arc<dyn PlaybackStateStore>,
    prefetch: Arc<PrefetchService>,
    resolver: Arc<StreamResolver>,
    announcer: Arc<Announcer>,
    library: Arc<MusicLibrary>,
    sink: Arc<dyn EventSink>,
    run_state: Mutex<ScheduleRunState>,
    currently_playing: RwLock<Option<Song>>,
    playback_cache: RwLock<Option<CachedPlay>>,
}

impl PlaybackController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        songs: Arc<dyn SongStore>,
        schedules: Arc<dyn ScheduleStore>,
        playback: Arc<dyn PlaybackStateStore>,
        prefetch: Arc<PrefetchService>,
        resolver: Arc<StreamResolver>,
        announcer: Arc<Announcer>,
        library: Arc<MusicLibrary>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            songs,
            schedules,
            playback,
            prefetch,
            resolver,
            announcer,
            library,
            sink,
            run_state: Mutex::new(ScheduleRunState::default()),
            currently_playing: RwLock::new(None),
            playback_cache: RwLock::new(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scheduled entry point
    // ─────────────────────────────────────────────────────────────────────────

    /// Fires a schedule: consumes its prepared slot and starts any burst.
    ///
    /// Skips entirely (except for advancing `next_run`) when the schedule ran
    /// within the last ten minutes: the broadcaster may have played the
    /// locked slot manually via "Next" moments before cron time.
    pub async fn execute_schedule(self: &Arc<Self>, schedule_id: i64, volume: u8, song_count: u32) {
        let schedule = match self.schedules.get(schedule_id).await {
            Ok(Some(s)) => s,
            Ok(None) => {
                log::warn!("[Playback] Schedule {} vanished before firing", schedule_id);
                return;
            }
            Err(e) => {
                log::error!("[Playback] Schedule lookup failed for {}: {}", schedule_id, e);
                return;
            }
        };

        let now = Utc::now();
        let guard = chrono::Duration::from_std(SCHEDULE_RERUN_GUARD).expect("guard fits");
        if let Some(last_run) = schedule.last_run {
            if now - last_run < guard {
                log::info!(
                    "[Playback] Schedule {} ran {}s ago, skipping this firing",
                    schedule_id,
                    (now - last_run).num_seconds()
                );
                self.persist_next_run(&schedule).await;
                return;
            }
        }

        if let Err(e) = self.schedules.set_last_run(schedule_id, now).await {
            log::error!("[Playback] Failed to persist last_run for {}: {}", schedule_id, e);
        }

        let remaining = song_count.saturating_sub(1);
        {
            let mut run_state = self.run_state.lock();
            run_state.remaining_in_burst = remaining;
            run_state.next_song_prepared = None;
        }

        let auto_next = remaining > 0;
        match self.prefetch.take_slot(schedule_id) {
            Some(slot) => self.play_prepared(slot, volume, auto_next).await,
            // No slot (e.g. wildcard-minute schedule without a pre-fetch job)
            None => self.play_live_top(volume, auto_next).await,
        }

        if remaining > 0 {
            self.spawn_burst_refill();
        }

        self.persist_next_run(&schedule).await;
    }

    async fn persist_next_run(&self, schedule: &Schedule) {
        match next_firing(&schedule.cron_expr) {
            Ok(next) => {
                if let Err(e) = self.schedules.set_next_run(schedule.id, next).await {
                    log::error!(
                        "[Playback] Failed to persist next_run for {}: {}",
                        schedule.id,
                        e
                    );
                }
            }
            Err(e) => log::error!(
                "[Playback] Cannot compute next firing for schedule {}: {}",
                schedule.id,
                e
            ),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Broadcaster commands
    // ─────────────────────────────────────────────────────────────────────────

    /// The "Next" command: plays the locked slot if one is imminent,
    /// otherwise the live top-voted song.
    ///
    /// Consuming the locked slot marks the schedule's `last_run` so the
    /// impending cron firing self-skips. Any in-flight pre-fetch is cancelled
    /// before live selection.
    pub async fn play_top_now(self: &Arc<Self>) {
        self.reset_run_state().await;
        self.prefetch.cancel_inflight();

        if let Some((schedule_id, slot)) = self.prefetch.take_imminent_slot() {
            log::info!(
                "[Playback] Next: consuming locked slot of schedule {}",
                schedule_id
            );
            if let Err(e) = self.schedules.set_last_run(schedule_id, Utc::now()).await {
                log::error!(
                    "[Playback] Failed to mark last_run for {}: {}",
                    schedule_id,
                    e
                );
            }
            let volume = match self.schedules.get(schedule_id).await {
                Ok(Some(schedule)) => schedule.volume,
                _ => self.current_volume().await,
            };
            self.play_prepared(slot, volume, false).await;
            return;
        }

        let volume = self.current_volume().await;
        self.play_live_top(volume, false).await;
    }

    /// Plays an explicit song immediately.
    pub async fn play_specific(self: &Arc<Self>, song_id: i64) -> AirwaveResult<()> {
        self.reset_run_state().await;
        self.prefetch.cancel_inflight();

        let song = self
            .songs
            .get(song_id)
            .await?
            .ok_or(AirwaveError::SongNotFound(song_id))?;

        let volume = self.current_volume().await;
        self.play_live(song, volume, false).await;
        Ok(())
    }

    pub async fn pause(&self) {
        self.update_state(|state| state.playing = false).await;
        self.sink.broadcast(ServerEvent::PlaybackPaused);
    }

    pub async fn resume(&self) {
        self.update_state(|state| state.playing = true).await;
        self.sink.broadcast(ServerEvent::PlaybackResumed);
    }

    pub async fn set_volume(&self, volume: u8) {
        let volume = volume.min(MAX_VOLUME);
        self.update_state(|state| state.volume = volume).await;
        self.sink
            .broadcast(ServerEvent::VolumeChanged {
                payload: VolumePayload { volume },
            });
    }

    /// Stops playback and clears every piece of transient state.
    pub async fn stop(&self) {
        self.update_state(|state| {
            state.current_song_id = None;
            state.playing = false;
            state.position_seconds = 0.0;
        })
        .await;

        *self.currently_playing.write() = None;
        *self.playback_cache.write() = None;
        self.reset_run_state().await;

        log::info!("[Playback] Stopped");
        self.sink.broadcast(ServerEvent::PlaybackStopped);
    }

    /// Records the broadcaster's reported playback position.
    pub async fn update_position(&self, position_seconds: f64) {
        self.update_state(|state| state.position_seconds = position_seconds)
            .await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Broadcaster reports
    // ─────────────────────────────────────────────────────────────────────────

    /// The broadcaster confirmed a song actually started playing.
    ///
    /// Updates now-playing metadata, caches the full play event for replay,
    /// and tells listeners via `song-playing-update`, never by re-emitting
    /// `play-song`, which would restart client playback.
    pub fn on_song_started(
        &self,
        song: Option<Song>,
        stream_url: String,
        announcement: Option<Announcement>,
        volume: u8,
        auto_next: bool,
    ) {
        let play = PlayPayload {
            song: song.clone(),
            stream_url,
            volume,
            auto_next,
            is_reconnect: false,
        };
        let event = match announcement {
            Some(a) => ServerEvent::PlayAnnouncement {
                payload: AnnouncementPayload {
                    play,
                    announcement_text: a.text,
                    announcement_audio_url: a.audio_url,
                },
            },
            None => ServerEvent::PlaySong { payload: play },
        };
        *self.playback_cache.write() = Some(CachedPlay {
            event,
            cached_at: Instant::now(),
        });

        match song {
            Some(song) => {
                log::info!("[Playback] On air: '{}' ({})", song.title, song.id);
                *self.currently_playing.write() = Some(song.clone());
                self.sink.broadcast(ServerEvent::SongPlayingUpdate {
                    payload: SongPlayingPayload {
                        song,
                        timestamp: now_millis(),
                    },
                });
            }
            None => {
                // Offline library track: nothing from the queue is on air
                *self.currently_playing.write() = None;
            }
        }
    }

    /// The broadcaster reported the current song finished.
    ///
    /// Continues the burst if songs remain (prepared slot first, live
    /// selection as fallback), otherwise emits `song-ended`.
    pub async fn on_song_ended(self: &Arc<Self>) {
        let burst = {
            let mut run_state = self.run_state.lock();
            if run_state.remaining_in_burst > 0 {
                run_state.remaining_in_burst -= 1;
                let remaining_after = run_state.remaining_in_burst;
                Some((run_state.next_song_prepared.take(), remaining_after))
            } else {
                None
            }
        };

        match burst {
            Some((slot, remaining_after)) => {
                let auto_next = remaining_after > 0;
                let volume = self.current_volume().await;
                match slot {
                    // A failed refill arrives here as an offline slot
                    Some(slot) => self.play_prepared(slot, volume, auto_next).await,
                    // Refill has not completed yet; select synchronously
                    None => self.play_live_top(volume, auto_next).await,
                }
                if remaining_after > 0 {
                    self.spawn_burst_refill();
                }
            }
            None => {
                let ended_id = self.currently_playing.read().as_ref().map(|s| s.id);
                *self.currently_playing.write() = None;
                self.update_state(|state| {
                    state.current_song_id = None;
                    state.playing = false;
                    state.position_seconds = 0.0;
                })
                .await;
                self.sink.broadcast(ServerEvent::SongEnded {
                    payload: SongEndedPayload { song_id: ended_id },
                });
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// The song the broadcaster most recently announced as playing.
    #[must_use]
    pub fn currently_playing(&self) -> Option<Song> {
        self.currently_playing.read().clone()
    }

    /// Reply for `get-playback-state` from a reconnecting broadcaster.
    ///
    /// Replays the cached play event (with `is_reconnect = true`) when the
    /// persisted state says something is playing and the cache entry is
    /// fresh; otherwise the idle reply (`playback-stopped`).
    pub async fn playback_state_reply(&self) -> ServerEvent {
        let playing = self
            .playback
            .get_current()
            .await
            .map(|state| state.playing)
            .unwrap_or(false);

        if playing {
            let cached = self.playback_cache.read().clone();
            if let Some(cached) = cached {
                if cached.cached_at.elapsed() <= PLAYBACK_CACHE_MAX_AGE {
                    return mark_reconnect(cached.event);
                }
            }
        }
        ServerEvent::PlaybackStopped
    }

    /// Clears the now-playing and replay caches.
    ///
    /// Called by the arbiter when the broadcaster's grace window lapses: the
    /// admin truly left, so there is nothing to hand back on reconnect.
    pub fn clear_broadcaster_caches(&self) {
        *self.currently_playing.write() = None;
        *self.playback_cache.write() = None;
    }

    async fn current_volume(&self) -> u8 {
        self.playback
            .get_current()
            .await
            .map(|state| state.volume)
            .unwrap_or_else(|_| PlaybackState::default().volume)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Airing
    // ─────────────────────────────────────────────────────────────────────────

    async fn play_prepared(&self, slot: PreparedSlot, volume: u8, auto_next: bool) {
        if slot.is_offline_fallback {
            self.play_offline_fallback(volume, auto_next).await;
            return;
        }
        match (slot.song, slot.stream_url) {
            (Some(song), Some(stream_url)) => {
                self.air_song(song, stream_url, slot.announcement, volume, auto_next)
                    .await;
            }
            _ => self.play_offline_fallback(volume, auto_next).await,
        }
    }

    /// Selects and airs the live top-voted song.
    async fn play_live_top(&self, volume: u8, auto_next: bool) {
        let song = match self.songs.top_unplayed().await {
            Ok(Some(song)) => song,
            Ok(None) => {
                log::info!("[Playback] Queue empty, airing offline fallback");
                self.play_offline_fallback(volume, auto_next).await;
                return;
            }
            Err(e) => {
                log::error!("[Playback] Queue read failed: {}", e);
                self.play_offline_fallback(volume, auto_next).await;
                return;
            }
        };
        self.play_live(song, volume, auto_next).await;
    }

    /// Airs a specific song, pre-extracting its stream URL to avoid
    /// client-visible latency.
    ///
    /// If extraction fails here the event carries the `/stream/{id}` endpoint
    /// URL instead; that path resolves cache-first at fetch time and falls
    /// back to the offline library, keeping the broadcast alive.
    async fn play_live(&self, song: Song, volume: u8, auto_next: bool) {
        let stream_url = match self.resolver.resolve(&song.url).await {
            Ok(url) => url,
            Err(e) => {
                log::warn!(
                    "[Playback] Pre-extraction failed for song {}, deferring to streaming endpoint: {}",
                    song.id,
                    e
                );
                format!("/stream/{}", song.id)
            }
        };
        let announcement = self.announcer.announce(&song).await;
        self.air_song(song, stream_url, announcement, volume, auto_next)
            .await;
    }

    async fn air_song(
        &self,
        song: Song,
        stream_url: String,
        announcement: Option<Announcement>,
        volume: u8,
        auto_next: bool,
    ) {
        if let Err(e) = self.songs.mark_aired(song.id).await {
            log::error!("[Playback] Failed to stamp airing of song {}: {}", song.id, e);
        }

        // Queue state first, then the play event, then recently-played
        self.sink.broadcast(ServerEvent::QueueUpdated);

        let play = PlayPayload {
            song: Some(song.clone()),
            stream_url,
            volume,
            auto_next,
            is_reconnect: false,
        };
        let event = match announcement {
            Some(a) => ServerEvent::PlayAnnouncement {
                payload: AnnouncementPayload {
                    play,
                    announcement_text: a.text,
                    announcement_audio_url: a.audio_url,
                },
            },
            None => ServerEvent::PlaySong { payload: play },
        };
        log::info!(
            "[Playback] Airing '{}' ({}) at volume {} (auto_next={})",
            song.title,
            song.id,
            volume,
            auto_next
        );
        self.sink.broadcast(event);
        self.sink.broadcast(ServerEvent::RecentlyPlayedUpdated);

        self.update_state(|state| {
            state.current_song_id = Some(song.id);
            state.playing = true;
            state.volume = volume;
            state.position_seconds = 0.0;
        })
        .await;
    }

    /// Airs a random local library track when nothing streamable is available.
    async fn play_offline_fallback(&self, volume: u8, auto_next: bool) {
        let Some(track) = self.library.random_track() else {
            log::error!("[Playback] Offline library is empty, stopping broadcast");
            self.sink.broadcast(ServerEvent::PlaybackStopped);
            return;
        };

        log::info!("[Playback] Airing offline library track '{}'", track);
        self.sink.broadcast(ServerEvent::PlaySong {
            payload: PlayPayload {
                song: None,
                stream_url: format!("/stream-offline/{}", track),
                volume,
                auto_next,
                is_reconnect: false,
            },
        });

        self.update_state(|state| {
            state.current_song_id = None;
            state.playing = true;
            state.volume = volume;
            state.position_seconds = 0.0;
        })
        .await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Burst plumbing
    // ─────────────────────────────────────────────────────────────────────────

    /// Background pre-fetch of the next burst song into the run state.
    fn spawn_burst_refill(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let Some(slot) = controller.prefetch.prepare_next_burst_song().await else {
                return;
            };

            let leftover = {
                let mut run_state = controller.run_state.lock();
                if run_state.remaining_in_burst > 0 {
                    run_state.next_song_prepared = Some(slot);
                    None
                } else {
                    // Burst was reset while we prepared; release the song
                    Some(slot)
                }
            };

            if let Some(slot) = leftover {
                controller.release_slot_reservation(slot).await;
            }
        });
    }

    /// Resets burst state, rolling back any reservation held by the pending
    /// next-song slot.
    async fn reset_run_state(&self) {
        let pending = {
            let mut run_state = self.run_state.lock();
            run_state.remaining_in_burst = 0;
            run_state.next_song_prepared.take()
        };
        if let Some(slot) = pending {
            self.release_slot_reservation(slot).await;
        }
    }

    async fn release_slot_reservation(&self, slot: PreparedSlot) {
        if let Some(song) = slot.song {
            if let Err(e) = self.songs.restore(song.id).await {
                log::warn!(
                    "[Playback] Failed to release reservation of song {}: {}",
                    song.id,
                    e
                );
            } else {
                self.sink.broadcast(ServerEvent::QueueUpdated);
            }
        }
    }

    async fn update_state(&self, f: impl FnOnce(&mut PlaybackState)) {
        let mut state = match self.playback.get_current().await {
            Ok(state) => state,
            Err(e) => {
                log::error!("[Playback] Failed to load playback state: {}", e);
                PlaybackState::default()
            }
        };
        f(&mut state);
        if let Err(e) = self.playback.save(&state).await {
            log::error!("[Playback] Failed to persist playback state: {}", e);
        }
    }
}

/// Sets the reconnect flag on a cached play event before replay.
fn mark_reconnect(event: ServerEvent) -> ServerEvent {
    match event {
        ServerEvent::PlaySong { mut payload } => {
            payload.is_reconnect = true;
            ServerEvent::PlaySong { payload }
        }
        ServerEvent::PlayAnnouncement { mut payload } => {
            payload.play.is_reconnect = true;
            ServerEvent::PlayAnnouncement { payload }
        }
        other => other,
    }
}
