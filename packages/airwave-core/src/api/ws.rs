//! WebSocket handler for the bidirectional listener protocol.
//!
//! Every client (listener or broadcaster) holds one connection. On attach the
//! server sends a state snapshot (current song + locked slot) so clients need
//! no separate REST call. Fan-out events arrive via the broadcast channel;
//! arbitration events and query replies via the connection's directed channel.
//! Both paths funnel through a single writer task, so per-connection delivery
//! order equals emission order.
//!
//! Admin-intent messages are gated on the arbiter: only the installed
//! broadcaster can report song starts/ends or drive playback state.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::api::AppState;
use crate::events::{AdminRejectedPayload, CurrentSongPayload, ServerEvent, TakeoverPayload};
use crate::model::{Announcement, Song};
use crate::services::admin_arbiter::AttachOutcome;

// ─────────────────────────────────────────────────────────────────────────────
// Client Message Types
// ─────────────────────────────────────────────────────────────────────────────

/// Incoming client messages: a closed set, one variant per wire event.
/// Anything else fails to parse and is dropped with a debug log.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientMessage {
    /// Request the broadcaster role.
    JoinAdminRoom {
        #[serde(default)]
        payload: JoinAdminPayload,
    },
    /// Broadcaster confirms a song actually started playing.
    SongStarted { payload: SongStartedPayload },
    /// Broadcaster reports the current song finished.
    SongEndedNotify,
    /// Broadcaster stops playback.
    PlaybackStopped,
    /// Any client asks what is on air.
    GetCurrentSong,
    /// Reconnecting broadcaster asks for a state replay.
    GetPlaybackState,
    /// Broadcaster reports playback progress.
    PlaybackStateUpdate { payload: PlaybackStateUpdatePayload },
    /// Keepalive.
    Heartbeat,
}

/// Payload for `join-admin-room`.
///
/// Authentication happens upstream (session middleware); by the time the
/// message arrives `user_id` identifies an authenticated admin.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinAdminPayload {
    #[serde(default)]
    takeover: bool,
    #[serde(default)]
    user_id: String,
}

/// Payload for `song-started`: echo of the play event the broadcaster acted
/// on. `song` is absent for offline library tracks.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SongStartedPayload {
    #[serde(default)]
    song: Option<Song>,
    stream_url: String,
    #[serde(default)]
    announcement_text: Option<String>,
    #[serde(default)]
    announcement_url: Option<String>,
    volume: u8,
    #[serde(default)]
    auto_next: bool,
}

/// Payload for `playback-state-update`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackStateUpdatePayload {
    /// Client-side stage of the airing state machine
    /// (`announcement`, `music`, ...).
    #[allow(dead_code)]
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    position: f64,
}

/// Serializes and sends one event over the socket.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            log::error!("[WS] Failed to serialize event: {}", e);
            true
        }
    }
}

/// Builds the attach-time snapshot: what is playing and what is locked.
fn snapshot_events(state: &AppState) -> Vec<ServerEvent> {
    let mut events = Vec::with_capacity(2);
    events.push(ServerEvent::CurrentSong {
        payload: CurrentSongPayload {
            song: state.controller.currently_playing(),
        },
    });
    if let Some(notice) = state.prefetch.current_lock_notice() {
        events.push(ServerEvent::NextSongLocked { payload: notice });
    }
    events
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main WebSocket connection handler.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.hub.subscribe();
    let (direct_tx, mut direct_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut last_activity = Instant::now();

    // Register for tracking, directed delivery and force-close capability
    let conn_guard = state.ws_manager.register(direct_tx);
    let cancel_token = conn_guard.cancel_token().clone();
    let conn_id = conn_guard.id().to_string();

    // Send the snapshot immediately so the client can render without a REST
    // round-trip
    for event in snapshot_events(&state) {
        if !send_event(&mut sender, &event).await {
            log::warn!("[WS] Failed to send snapshot, client disconnected");
            return;
        }
    }

    // Use interval instead of sleep to reduce timer allocations and prevent
    // drift. Delay mode skips missed ticks rather than bursting to catch up.
    let heartbeat_check =
        Duration::from_secs(state.config.read().ws_heartbeat_check_interval_secs);
    let heartbeat_timeout = Duration::from_secs(state.config.read().ws_heartbeat_timeout_secs);
    let mut heartbeat_interval = tokio::time::interval(heartbeat_check);
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Handle force-close request (takeover or shutdown)
            _ = cancel_token.cancelled() => {
                // Flush pending directed events (the force-disconnect notice
                // is queued just before the close request)
                while let Ok(event) = direct_rx.try_recv() {
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                log::info!("[WS] Connection force-closed: {}", conn_id);
                break;
            }
            // Handle incoming messages from the client
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                handle_client_message(&state, &conn_id, message, &mut sender).await;
                            }
                            Err(e) => {
                                log::debug!("[WS] Dropping unknown message from {}: {}", conn_id, e);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            // Directed events (arbitration, replies) for this connection
            Some(event) = direct_rx.recv() => {
                if !send_event(&mut sender, &event).await {
                    break;
                }
            }
            // Fan-out events for every listener
            result = broadcast_rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_event(&mut sender, &event).await {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("[WS] Connection {} lagged by {} events", conn_id, n);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            // Heartbeat timeout check
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > heartbeat_timeout {
                    log::warn!("[WS] Heartbeat timeout on {}", conn_id);
                    break;
                }
            }
        }
    }

    // If this was the broadcaster, start the grace window
    state.arbiter.on_disconnect(&conn_id);

    // ConnectionGuard's Drop impl unregisters the connection
}

/// Dispatches one parsed client message.
async fn handle_client_message(
    state: &AppState,
    conn_id: &str,
    message: ClientMessage,
    sender: &mut SplitSink<WebSocket, Message>,
) {
    match message {
        ClientMessage::JoinAdminRoom { payload } => {
            let outcome = state
                .arbiter
                .attach(conn_id, &payload.user_id, payload.takeover);
            match outcome {
                AttachOutcome::Active { .. } => {
                    send_event(sender, &ServerEvent::AdminActive).await;
                }
                AttachOutcome::Rejected {
                    song_playing,
                    current_song,
                } => {
                    send_event(
                        sender,
                        &ServerEvent::AdminRejected {
                            payload: AdminRejectedPayload {
                                song_playing,
                                current_song,
                            },
                        },
                    )
                    .await;
                }
                AttachOutcome::Takeover {
                    displaced_conn_id,
                    current_song,
                    ..
                } => {
                    if current_song.is_some() {
                        send_event(
                            sender,
                            &ServerEvent::TakeoverWarning {
                                payload: TakeoverPayload { current_song },
                            },
                        )
                        .await;
                    }
                    // Notify the incumbent, then close it
                    state
                        .ws_manager
                        .send_to(&displaced_conn_id, ServerEvent::ForceDisconnect);
                    state.ws_manager.close_connection(&displaced_conn_id);

                    send_event(sender, &ServerEvent::AdminActive).await;
                }
            }
        }
        ClientMessage::SongStarted { payload } => {
            if !state.arbiter.is_active_admin(conn_id) {
                log::warn!("[WS] song-started from non-broadcaster {}", conn_id);
                return;
            }
            let announcement = payload.announcement_text.map(|text| Announcement {
                text,
                audio_url: payload.announcement_url,
            });
            state.controller.on_song_started(
                payload.song,
                payload.stream_url,
                announcement,
                payload.volume,
                payload.auto_next,
            );
        }
        ClientMessage::SongEndedNotify => {
            if !state.arbiter.is_active_admin(conn_id) {
                log::warn!("[WS] song-ended-notify from non-broadcaster {}", conn_id);
                return;
            }
            state.controller.on_song_ended().await;
        }
        ClientMessage::PlaybackStopped => {
            if !state.arbiter.is_active_admin(conn_id) {
                return;
            }
            state.controller.stop().await;
        }
        ClientMessage::GetCurrentSong => {
            send_event(
                sender,
                &ServerEvent::CurrentSong {
                    payload: CurrentSongPayload {
                        song: state.controller.currently_playing(),
                    },
                },
            )
            .await;
        }
        ClientMessage::GetPlaybackState => {
            if !state.arbiter.is_active_admin(conn_id) {
                return;
            }
            let reply = state.controller.playback_state_reply().await;
            send_event(sender, &reply).await;
        }
        ClientMessage::PlaybackStateUpdate { payload } => {
            if !state.arbiter.is_active_admin(conn_id) {
                return;
            }
            state.controller.update_position(payload.position).await;
        }
        ClientMessage::Heartbeat => {
            // Activity timestamp already refreshed by the receive loop
        }
    }
}
