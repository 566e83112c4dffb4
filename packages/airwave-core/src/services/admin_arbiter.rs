//! Single-broadcaster arbitration.
//!
//! At most one admin connection controls the broadcast. An arriving admin
//! either becomes authoritative (no incumbent), is rejected (incumbent, no
//! takeover intent), or displaces the incumbent (explicit takeover). On
//! disconnect the broadcaster's identity is remembered for a short grace
//! window so a page refresh reattaches seamlessly; when the window lapses the
//! now-playing and replay caches are cleared because the admin truly left.
//!
//! The arbiter decides; the WebSocket layer delivers the resulting events
//! (`admin-active`, `admin-rejected`, `takeover-warning`, `force-disconnect`)
//! and closes displaced connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::Song;
use crate::protocol_constants::ADMIN_GRACE;
use crate::services::playback::PlaybackController;

/// The installed broadcaster connection.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub conn_id: String,
    pub user_id: String,
    pub session_id: String,
}

/// Identity remembered between disconnect and grace expiry.
struct GraceState {
    seq: u64,
    user_id: String,
    session_id: String,
    token: CancellationToken,
}

/// Result of an attach attempt, acted upon by the WebSocket layer.
#[derive(Debug)]
pub enum AttachOutcome {
    /// The connection is now the broadcaster; send `admin-active`.
    Active { session_id: String },
    /// An incumbent exists and no takeover was requested; send
    /// `admin-rejected` and do not install.
    Rejected {
        song_playing: bool,
        current_song: Option<Song>,
    },
    /// Takeover granted; send `takeover-warning` to the new connection (when
    /// a song is playing) and `force-disconnect` to the displaced one.
    Takeover {
        session_id: String,
        displaced_conn_id: String,
        current_song: Option<Song>,
    },
}

/// Owns the admin session and its grace timer.
pub struct AdminArbiter {
    controller: Arc<PlaybackController>,
    session: Mutex<Option<AdminSession>>,
    grace: Mutex<Option<GraceState>>,
    grace_seq: AtomicU64,
}

impl AdminArbiter {
    pub fn new(controller: Arc<PlaybackController>) -> Self {
        Self {
            controller,
            session: Mutex::new(None),
            grace: Mutex::new(None),
            grace_seq: AtomicU64::new(1),
        }
    }

    /// Handles an admin connection requesting the broadcaster role.
    pub fn attach(&self, conn_id: &str, user_id: &str, takeover: bool) -> AttachOutcome {
        let current_song = self.controller.currently_playing();
        let mut session = self.session.lock();

        match session.as_ref() {
            None => {
                let session_id = self.consume_grace(user_id);
                log::info!(
                    "[Arbiter] Broadcaster installed: conn={}, user={}",
                    conn_id,
                    user_id
                );
                *session = Some(AdminSession {
                    conn_id: conn_id.to_string(),
                    user_id: user_id.to_string(),
                    session_id: session_id.clone(),
                });
                AttachOutcome::Active { session_id }
            }
            Some(existing) if existing.conn_id == conn_id => AttachOutcome::Active {
                session_id: existing.session_id.clone(),
            },
            Some(_) if !takeover => {
                log::info!(
                    "[Arbiter] Rejected admin conn {} (incumbent present, no takeover)",
                    conn_id
                );
                AttachOutcome::Rejected {
                    song_playing: current_song.is_some(),
                    current_song,
                }
            }
            Some(existing) => {
                let displaced_conn_id = existing.conn_id.clone();
                let session_id = Uuid::new_v4().to_string();
                log::warn!(
                    "[Arbiter] Takeover: conn {} displaces conn {}",
                    conn_id,
                    displaced_conn_id
                );
                *session = Some(AdminSession {
                    conn_id: conn_id.to_string(),
                    user_id: user_id.to_string(),
                    session_id: session_id.clone(),
                });
                AttachOutcome::Takeover {
                    session_id,
                    displaced_conn_id,
                    current_song,
                }
            }
        }
    }

    /// Resolves any pending grace window during attach.
    ///
    /// The same user reattaching inherits their session id and keeps the
    /// replay caches; a different user gets a fresh session and the previous
    /// broadcaster's caches are dropped.
    fn consume_grace(&self, user_id: &str) -> String {
        let Some(grace) = self.grace.lock().take() else {
            return Uuid::new_v4().to_string();
        };
        grace.token.cancel();

        if grace.user_id == user_id {
            log::info!("[Arbiter] User {} reattached within grace window", user_id);
            grace.session_id
        } else {
            self.controller.clear_broadcaster_caches();
            Uuid::new_v4().to_string()
        }
    }

    /// Handles a connection closing; starts the grace timer if it was the
    /// broadcaster.
    pub fn on_disconnect(self: &Arc<Self>, conn_id: &str) {
        let remembered = {
            let mut session = self.session.lock();
            match session.as_ref() {
                Some(existing) if existing.conn_id == conn_id => session.take(),
                _ => None,
            }
        };
        let Some(remembered) = remembered else {
            return;
        };

        let seq = self.grace_seq.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        log::info!(
            "[Arbiter] Broadcaster disconnected (user {}), grace window open",
            remembered.user_id
        );
        *self.grace.lock() = Some(GraceState {
            seq,
            user_id: remembered.user_id,
            session_id: remembered.session_id,
            token: token.clone(),
        });

        let arbiter = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(ADMIN_GRACE) => {
                    let lapsed = {
                        let mut grace = arbiter.grace.lock();
                        match grace.as_ref() {
                            Some(state) if state.seq == seq => {
                                *grace = None;
                                true
                            }
                            _ => false,
                        }
                    };
                    if lapsed {
                        log::info!("[Arbiter] Grace window lapsed, broadcaster left");
                        arbiter.controller.clear_broadcaster_caches();
                    }
                }
            }
        });
    }

    /// Whether `conn_id` is the installed broadcaster.
    ///
    /// Every admin-intent message is gated on this.
    #[must_use]
    pub fn is_active_admin(&self, conn_id: &str) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| s.conn_id == conn_id)
    }

    /// The installed session, if any.
    #[must_use]
    pub fn active_session(&self) -> Option<AdminSession> {
        self.session.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSink, NoopEventSink};
    use crate::extract::{StreamResolver, StreamUrlCache};
    use crate::services::prefetch::PrefetchService;
    use crate::store::{MusicLibrary, ScheduleStore, SongStore};
    use crate::test_fixtures::{
        song, FakeExtractor, MemPlaybackStore, MemScheduleStore, MemSongStore,
    };
    use crate::tts::Announcer;

    fn controller() -> Arc<PlaybackController> {
        let songs = MemSongStore::with(vec![]);
        let schedules = MemScheduleStore::with(vec![]);
        let resolver = Arc::new(StreamResolver::new(
            FakeExtractor::ok(),
            Arc::new(StreamUrlCache::new()),
        ));
        let announcer = Arc::new(Announcer::new(None, "/tmp/unused-tts", "DJ"));
        let prefetch = Arc::new(PrefetchService::new(
            schedules.clone() as Arc<dyn ScheduleStore>,
            songs.clone() as Arc<dyn SongStore>,
            Arc::clone(&resolver),
            Arc::clone(&announcer),
            Arc::new(NoopEventSink) as Arc<dyn EventSink>,
        ));
        Arc::new(PlaybackController::new(
            songs,
            schedules,
            MemPlaybackStore::new(),
            prefetch,
            resolver,
            announcer,
            Arc::new(MusicLibrary::new("/nonexistent-library")),
            Arc::new(NoopEventSink),
        ))
    }

    fn arbiter() -> (Arc<AdminArbiter>, Arc<PlaybackController>) {
        let controller = controller();
        (Arc::new(AdminArbiter::new(Arc::clone(&controller))), controller)
    }

    #[test]
    fn first_attach_becomes_active() {
        let (arbiter, _) = arbiter();
        let outcome = arbiter.attach("ws-1", "alice", false);
        assert!(matches!(outcome, AttachOutcome::Active { .. }));
        assert!(arbiter.is_active_admin("ws-1"));
    }

    #[test]
    fn second_attach_without_takeover_is_rejected() {
        let (arbiter, controller) = arbiter();
        arbiter.attach("ws-1", "alice", false);
        controller.on_song_started(
            Some(song(7, 1)),
            "https://cdn.example/a".into(),
            None,
            70,
            false,
        );

        match arbiter.attach("ws-2", "bob", false) {
            AttachOutcome::Rejected {
                song_playing,
                current_song,
            } => {
                assert!(song_playing);
                assert_eq!(current_song.unwrap().id, 7);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(arbiter.is_active_admin("ws-1"));
        assert!(!arbiter.is_active_admin("ws-2"));
    }

    #[test]
    fn takeover_displaces_incumbent() {
        let (arbiter, _) = arbiter();
        arbiter.attach("ws-1", "alice", false);

        match arbiter.attach("ws-2", "bob", true) {
            AttachOutcome::Takeover {
                displaced_conn_id, ..
            } => assert_eq!(displaced_conn_id, "ws-1"),
            other => panic!("expected takeover, got {:?}", other),
        }
        assert!(arbiter.is_active_admin("ws-2"));
        assert!(!arbiter.is_active_admin("ws-1"));
    }

    #[test]
    fn reattach_is_idempotent_for_same_connection() {
        let (arbiter, _) = arbiter();
        let first = arbiter.attach("ws-1", "alice", false);
        let second = arbiter.attach("ws-1", "alice", false);

        let (AttachOutcome::Active { session_id: a }, AttachOutcome::Active { session_id: b }) =
            (first, second)
        else {
            panic!("expected both attaches to be active");
        };
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn same_user_reattaches_within_grace_keeping_session() {
        let (arbiter, controller) = arbiter();
        let AttachOutcome::Active { session_id } = arbiter.attach("ws-1", "alice", false) else {
            panic!("expected active");
        };
        controller.on_song_started(
            Some(song(7, 1)),
            "https://cdn.example/a".into(),
            None,
            70,
            false,
        );

        arbiter.on_disconnect("ws-1");
        tokio::time::advance(std::time::Duration::from_secs(3)).await;

        let AttachOutcome::Active {
            session_id: reattached,
        } = arbiter.attach("ws-2", "alice", false)
        else {
            panic!("expected seamless reattach");
        };
        assert_eq!(reattached, session_id);
        // Caches survived the refresh
        assert_eq!(controller.currently_playing().unwrap().id, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_lapse_clears_broadcaster_caches() {
        let (arbiter, controller) = arbiter();
        arbiter.attach("ws-1", "alice", false);
        controller.on_song_started(
            Some(song(7, 1)),
            "https://cdn.example/a".into(),
            None,
            70,
            false,
        );

        arbiter.on_disconnect("ws-1");
        // Let the spawned grace task register its sleep timer before the
        // clock advances, otherwise the timer starts counting from the
        // post-advance instant and never lapses within this test.
        tokio::task::yield_now().await;
        tokio::time::advance(ADMIN_GRACE + std::time::Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert!(controller.currently_playing().is_none());
        assert!(arbiter.active_session().is_none());

        // A later attach is a fresh install, not a reattach
        let outcome = arbiter.attach("ws-2", "alice", false);
        assert!(matches!(outcome, AttachOutcome::Active { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn different_user_during_grace_drops_previous_caches() {
        let (arbiter, controller) = arbiter();
        arbiter.attach("ws-1", "alice", false);
        controller.on_song_started(
            Some(song(7, 1)),
            "https://cdn.example/a".into(),
            None,
            70,
            false,
        );

        arbiter.on_disconnect("ws-1");
        tokio::time::advance(std::time::Duration::from_secs(1)).await;

        let outcome = arbiter.attach("ws-2", "bob", false);
        assert!(matches!(outcome, AttachOutcome::Active { .. }));
        assert!(controller.currently_playing().is_none());
    }

    #[test]
    fn disconnect_of_non_admin_connection_is_ignored() {
        let (arbiter, _) = arbiter();
        arbiter.attach("ws-1", "alice", false);

        // Needs a runtime only when a grace timer actually starts, so a
        // foreign disconnect must not spawn anything
        let arbiter2 = Arc::clone(&arbiter);
        arbiter2.on_disconnect("ws-99");
        assert!(arbiter.is_active_admin("ws-1"));
    }
}
