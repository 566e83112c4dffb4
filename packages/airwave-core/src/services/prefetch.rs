//! Pre-fetch pipeline: reserves and prepares the next song before airtime.
//!
//! Five minutes before a schedule fires, [`PrefetchService::prepare_scheduled_song`]
//! locks the top-voted song (reservation), resolves its stream URL, renders a
//! DJ announcement when the song carries a dedication, and publishes a
//! `next-song-locked` notice. The playback controller consumes the prepared
//! slot at cron time.
//!
//! Failure leaves the system in one of exactly two states: "song reserved and
//! streamable" or "offline fallback", never "reserved but unplayable".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::events::{EventSink, LockedPayload, ServerEvent};
use crate::extract::StreamResolver;
use crate::model::{PreparedSlot, Song};
use crate::protocol_constants::{PREFETCH_BUDGET, PREFETCH_LEAD};
use crate::services::scheduler::next_firing;
use crate::store::{ScheduleStore, SongStore};
use crate::tts::Announcer;
use crate::utils::format_local_hhmm;

/// Tracks one in-flight preparation so a newer run (or an admin command) can
/// cancel it.
struct Inflight {
    seq: u64,
    token: CancellationToken,
}

/// Owns the prepared-slot map and the `Song.played` reservation flag.
pub struct PrefetchService {
    schedules: Arc<dyn ScheduleStore>,
    songs: Arc<dyn SongStore>,
    resolver: Arc<StreamResolver>,
    announcer: Arc<Announcer>,
    sink: Arc<dyn EventSink>,
    slots: DashMap<i64, PreparedSlot>,
    inflight: DashMap<i64, Inflight>,
    inflight_seq: AtomicU64,
    /// Last lock notice published, replayed to newly attached clients.
    last_lock_notice: Mutex<Option<LockedPayload>>,
}

impl PrefetchService {
    pub fn new(
        schedules: Arc<dyn ScheduleStore>,
        songs: Arc<dyn SongStore>,
        resolver: Arc<StreamResolver>,
        announcer: Arc<Announcer>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            schedules,
            songs,
            resolver,
            announcer,
            sink,
            slots: DashMap::new(),
            inflight: DashMap::new(),
            inflight_seq: AtomicU64::new(1),
            last_lock_notice: Mutex::new(None),
        }
    }

    /// Sole entry point, invoked by the scheduler at T-5m.
    ///
    /// Never returns an error; failures become an offline-fallback slot and a
    /// `next-song-locked` notice carrying the failure flags.
    pub async fn prepare_scheduled_song(&self, schedule_id: i64, _volume: u8) {
        let seq = self.inflight_seq.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        if let Some(prev) = self.inflight.insert(
            schedule_id,
            Inflight {
                seq,
                token: cancel.clone(),
            },
        ) {
            prev.token.cancel();
        }

        self.prepare_guarded(schedule_id, &cancel).await;

        // Only clear our own entry; a newer run may have replaced it
        self.inflight
            .remove_if(&schedule_id, |_, inflight| inflight.seq == seq);
    }

    async fn prepare_guarded(&self, schedule_id: i64, cancel: &CancellationToken) {
        let schedule = match self.schedules.get(schedule_id).await {
            Ok(Some(s)) if s.active => s,
            Ok(_) => {
                log::warn!(
                    "[Prefetch] Schedule {} missing or inactive, aborting",
                    schedule_id
                );
                return;
            }
            Err(e) => {
                log::error!("[Prefetch] Schedule lookup failed for {}: {}", schedule_id, e);
                return;
            }
        };

        let schedule_time = next_firing(&schedule.cron_expr)
            .ok()
            .flatten()
            .map(format_local_hhmm);

        let song = match self.songs.top_unplayed().await {
            Ok(Some(song)) => song,
            Ok(None) => {
                log::info!(
                    "[Prefetch] Queue empty for schedule {}, locking offline slot",
                    schedule_id
                );
                self.install_offline_slot(schedule_id, schedule_time, false);
                return;
            }
            Err(e) => {
                log::error!("[Prefetch] Queue read failed for {}: {}", schedule_id, e);
                self.install_offline_slot(schedule_id, schedule_time, false);
                return;
            }
        };

        // Reserve immediately so concurrent voting cannot change the outcome
        if let Err(e) = self.songs.reserve(song.id).await {
            log::error!("[Prefetch] Could not reserve song {}: {}", song.id, e);
            self.install_offline_slot(schedule_id, schedule_time, false);
            return;
        }

        let resolved = tokio::select! {
            _ = cancel.cancelled() => {
                log::info!(
                    "[Prefetch] Preparation for schedule {} cancelled, releasing song {}",
                    schedule_id,
                    song.id
                );
                self.restore_reservation(&song).await;
                return;
            }
            result = tokio::time::timeout(PREFETCH_BUDGET, self.resolver.resolve(&song.url)) => {
                match result {
                    Ok(Ok(url)) => Ok(url),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("pre-fetch budget exhausted".to_string()),
                }
            }
        };

        let stream_url = match resolved {
            Ok(url) => url,
            Err(reason) => {
                log::warn!(
                    "[Prefetch] Stream resolution failed for song {} (schedule {}): {}",
                    song.id,
                    schedule_id,
                    reason
                );
                self.restore_reservation(&song).await;
                self.install_offline_slot(schedule_id, schedule_time, true);
                return;
            }
        };

        // Announcement failure degrades to text-only inside the announcer
        let announcement = self.announcer.announce(&song).await;
        let has_announcement = announcement.is_some();

        let notice = LockedPayload {
            song: Some(song.summary()),
            schedule_time,
            has_announcement,
            is_offline: false,
            download_failed: false,
        };

        self.slots.insert(
            schedule_id,
            PreparedSlot::ready(song.clone(), stream_url, announcement),
        );
        *self.last_lock_notice.lock() = Some(notice.clone());

        log::info!(
            "[Prefetch] Locked song {} ('{}') for schedule {}",
            song.id,
            song.title,
            schedule_id
        );
        self.sink
            .broadcast(ServerEvent::NextSongLocked { payload: notice });
        self.sink.broadcast(ServerEvent::QueueUpdated);
    }

    /// Prepares the next burst song without publishing a lock notice.
    ///
    /// Used by the playback controller to refill `next_song_prepared` while a
    /// burst song is on air. Returns `None` only when there is nothing to
    /// prepare (empty queue, reservation failure); the controller then
    /// re-selects live at the song's turn. A song whose stream cannot be
    /// resolved yields an offline-fallback slot instead, so the burst
    /// continues on the local library rather than re-attempting the same
    /// broken URL.
    pub async fn prepare_next_burst_song(&self) -> Option<PreparedSlot> {
        let song = match self.songs.top_unplayed().await {
            Ok(Some(song)) => song,
            Ok(None) => return None,
            Err(e) => {
                log::error!("[Prefetch] Queue read failed for burst refill: {}", e);
                return None;
            }
        };

        if let Err(e) = self.songs.reserve(song.id).await {
            log::error!("[Prefetch] Could not reserve burst song {}: {}", song.id, e);
            return None;
        }
        self.sink.broadcast(ServerEvent::QueueUpdated);

        match tokio::time::timeout(PREFETCH_BUDGET, self.resolver.resolve(&song.url)).await {
            Ok(Ok(url)) => {
                let announcement = self.announcer.announce(&song).await;
                log::info!("[Prefetch] Burst refill prepared song {}", song.id);
                Some(PreparedSlot::ready(song, url, announcement))
            }
            other => {
                let reason = match other {
                    Ok(Err(e)) => e.to_string(),
                    _ => "pre-fetch budget exhausted".to_string(),
                };
                log::warn!(
                    "[Prefetch] Burst refill failed for song {}, continuing offline: {}",
                    song.id,
                    reason
                );
                self.restore_reservation(&song).await;
                self.sink.broadcast(ServerEvent::QueueUpdated);
                Some(PreparedSlot::offline())
            }
        }
    }

    fn install_offline_slot(
        &self,
        schedule_id: i64,
        schedule_time: Option<String>,
        download_failed: bool,
    ) {
        let notice = LockedPayload {
            song: None,
            schedule_time,
            has_announcement: false,
            is_offline: true,
            download_failed,
        };
        self.slots.insert(schedule_id, PreparedSlot::offline());
        *self.last_lock_notice.lock() = Some(notice.clone());
        self.sink
            .broadcast(ServerEvent::NextSongLocked { payload: notice });
    }

    async fn restore_reservation(&self, song: &Song) {
        if let Err(e) = self.songs.restore(song.id).await {
            // Invariant break: reservation could not be rolled back. The slot
            // is discarded and listeners already see an offline lock.
            log::warn!(
                "[Prefetch] Failed to restore reservation for song {}: {}",
                song.id,
                e
            );
        }
    }

    // ── Slot access ─────────────────────────────────────────────────────────

    /// Consumes the prepared slot for a schedule, if any.
    pub fn take_slot(&self, schedule_id: i64) -> Option<PreparedSlot> {
        let slot = self.slots.remove(&schedule_id).map(|(_, slot)| slot);
        if slot.is_some() {
            *self.last_lock_notice.lock() = None;
        }
        slot
    }

    /// Consumes a slot whose main firing is imminent (prepared within the
    /// lead window), marking the schedule it belongs to.
    ///
    /// Used by the admin "Next" command: a locked slot always wins over a
    /// freshly computed top.
    pub fn take_imminent_slot(&self) -> Option<(i64, PreparedSlot)> {
        let lead = chrono::Duration::from_std(PREFETCH_LEAD + std::time::Duration::from_secs(60))
            .expect("lead window fits chrono::Duration");
        let now = Utc::now();

        let schedule_id = self
            .slots
            .iter()
            .find(|entry| now - entry.value().prepared_at <= lead)
            .map(|entry| *entry.key())?;

        self.take_slot(schedule_id).map(|slot| (schedule_id, slot))
    }

    /// Discards a schedule's slot, rolling back any song reservation it holds.
    pub async fn discard_slot(&self, schedule_id: i64) {
        if let Some((_, slot)) = self.slots.remove(&schedule_id) {
            *self.last_lock_notice.lock() = None;
            if let Some(song) = slot.song {
                log::info!(
                    "[Prefetch] Discarding slot for schedule {}, releasing song {}",
                    schedule_id,
                    song.id
                );
                self.restore_reservation(&song).await;
            }
        }
    }

    /// Cancels any in-flight preparation for every schedule.
    ///
    /// The admin "Next" command calls this before live selection.
    pub fn cancel_inflight(&self) {
        for entry in self.inflight.iter() {
            entry.value().token.cancel();
        }
    }

    /// The last published lock notice, for new-connection snapshots.
    #[must_use]
    pub fn current_lock_notice(&self) -> Option<LockedPayload> {
        self.last_lock_notice.lock().clone()
    }

    /// Number of prepared slots currently held.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventSink;
    use crate::extract::StreamUrlCache;
    use crate::test_fixtures::{
        schedule, song, FakeExtractor, MemScheduleStore, MemSongStore, RecordingSink,
    };

    fn service(
        songs: Arc<MemSongStore>,
        schedules: Arc<MemScheduleStore>,
        extractor: Arc<FakeExtractor>,
        sink: Arc<dyn EventSink>,
    ) -> PrefetchService {
        let resolver = Arc::new(StreamResolver::new(
            extractor,
            Arc::new(StreamUrlCache::new()),
        ));
        let announcer = Arc::new(Announcer::new(None, "/tmp/unused-tts", "DJ"));
        PrefetchService::new(schedules, songs, resolver, announcer, sink)
    }

    #[tokio::test]
    async fn happy_path_locks_top_song_and_notifies() {
        let songs = MemSongStore::with(vec![song(1, 3), song(2, 1)]);
        let schedules = MemScheduleStore::with(vec![schedule(10)]);
        let sink = RecordingSink::new();
        let prefetch = service(
            Arc::clone(&songs),
            schedules,
            FakeExtractor::ok(),
            sink.clone(),
        );

        prefetch.prepare_scheduled_song(10, 70).await;

        // Song 1 reserved but not aired
        let reserved = songs.songs.read()[0].clone();
        assert!(reserved.played);
        assert!(reserved.played_at.is_none());

        let slot = prefetch.take_slot(10).unwrap();
        assert!(!slot.is_offline_fallback);
        assert_eq!(slot.song.as_ref().unwrap().id, 1);
        assert!(slot.stream_url.is_some());

        assert_eq!(sink.types(), vec!["next-song-locked", "queue-updated"]);
        let events = sink.events.lock();
        match &events[0] {
            ServerEvent::NextSongLocked { payload } => {
                assert_eq!(payload.song.as_ref().unwrap().id, 1);
                assert!(payload.schedule_time.is_some());
                assert!(!payload.is_offline);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_queue_installs_offline_slot() {
        let songs = MemSongStore::with(vec![]);
        let schedules = MemScheduleStore::with(vec![schedule(10)]);
        let sink = RecordingSink::new();
        let prefetch = service(songs, schedules, FakeExtractor::ok(), sink.clone());

        prefetch.prepare_scheduled_song(10, 70).await;

        let slot = prefetch.take_slot(10).unwrap();
        assert!(slot.is_offline_fallback);
        let events = sink.events.lock();
        match &events[0] {
            ServerEvent::NextSongLocked { payload } => {
                assert!(payload.is_offline);
                assert!(!payload.download_failed);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn extractor_failure_restores_reservation_and_goes_offline() {
        let songs = MemSongStore::with(vec![song(1, 3)]);
        let schedules = MemScheduleStore::with(vec![schedule(10)]);
        let sink = RecordingSink::new();
        let prefetch = service(
            Arc::clone(&songs),
            schedules,
            FakeExtractor::failing(),
            sink.clone(),
        );

        prefetch.prepare_scheduled_song(10, 70).await;

        // Reservation rolled back: never "reserved but unplayable"
        assert!(!songs.songs.read()[0].played);

        let slot = prefetch.take_slot(10).unwrap();
        assert!(slot.is_offline_fallback);
        let events = sink.events.lock();
        match &events[0] {
            ServerEvent::NextSongLocked { payload } => {
                assert!(payload.is_offline);
                assert!(payload.download_failed);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn inactive_schedule_aborts_without_side_effects() {
        let songs = MemSongStore::with(vec![song(1, 3)]);
        let mut inactive = schedule(10);
        inactive.active = false;
        let schedules = MemScheduleStore::with(vec![inactive]);
        let sink = RecordingSink::new();
        let prefetch = service(
            Arc::clone(&songs),
            schedules,
            FakeExtractor::ok(),
            sink.clone(),
        );

        prefetch.prepare_scheduled_song(10, 70).await;

        assert!(!songs.songs.read()[0].played);
        assert_eq!(prefetch.slot_count(), 0);
        assert!(sink.events.lock().is_empty());
    }

    #[tokio::test]
    async fn discard_slot_releases_reservation() {
        let songs = MemSongStore::with(vec![song(1, 3)]);
        let schedules = MemScheduleStore::with(vec![schedule(10)]);
        let prefetch = service(
            Arc::clone(&songs),
            schedules,
            FakeExtractor::ok(),
            Arc::new(NoopEventSink),
        );

        prefetch.prepare_scheduled_song(10, 70).await;
        assert!(songs.songs.read()[0].played);

        prefetch.discard_slot(10).await;
        assert!(!songs.songs.read()[0].played);
        assert_eq!(prefetch.slot_count(), 0);
        assert!(prefetch.current_lock_notice().is_none());
    }

    #[tokio::test]
    async fn imminent_slot_is_consumable_once() {
        let songs = MemSongStore::with(vec![song(1, 3)]);
        let schedules = MemScheduleStore::with(vec![schedule(10)]);
        let prefetch = service(
            songs,
            schedules,
            FakeExtractor::ok(),
            Arc::new(NoopEventSink),
        );

        prefetch.prepare_scheduled_song(10, 70).await;

        let (schedule_id, slot) = prefetch.take_imminent_slot().unwrap();
        assert_eq!(schedule_id, 10);
        assert!(!slot.is_offline_fallback);
        assert!(prefetch.take_imminent_slot().is_none());
    }

    #[tokio::test]
    async fn burst_refill_reserves_and_prepares_next_song() {
        let songs = MemSongStore::with(vec![song(1, 3), song(2, 1)]);
        let schedules = MemScheduleStore::with(vec![schedule(10)]);
        let sink = RecordingSink::new();
        let prefetch = service(
            Arc::clone(&songs),
            schedules,
            FakeExtractor::ok(),
            sink.clone(),
        );

        // Song 1 is already on air
        songs.mark_aired(1).await.unwrap();

        let slot = prefetch.prepare_next_burst_song().await.unwrap();
        assert_eq!(slot.song.as_ref().unwrap().id, 2);
        assert!(songs.songs.read()[1].played);
        assert_eq!(sink.types(), vec!["queue-updated"]);
    }

    #[tokio::test]
    async fn burst_refill_failure_restores_reservation_and_goes_offline() {
        let songs = MemSongStore::with(vec![song(1, 3)]);
        let schedules = MemScheduleStore::with(vec![schedule(10)]);
        let prefetch = service(
            Arc::clone(&songs),
            schedules,
            FakeExtractor::failing(),
            Arc::new(NoopEventSink),
        );

        let slot = prefetch.prepare_next_burst_song().await.unwrap();
        assert!(slot.is_offline_fallback, "failed refill must continue offline");
        assert!(!songs.songs.read()[0].played);
    }

    #[tokio::test]
    async fn burst_refill_returns_none_on_empty_queue() {
        let songs = MemSongStore::with(vec![]);
        let schedules = MemScheduleStore::with(vec![schedule(10)]);
        let prefetch = service(
            songs,
            schedules,
            FakeExtractor::ok(),
            Arc::new(NoopEventSink),
        );

        assert!(prefetch.prepare_next_burst_song().await.is_none());
    }
}
