//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic. The
//! schedule CRUD routes form the admin boundary of spec'd input validation:
//! bad cron expressions, volumes outside 0-100 and song counts outside 1-10
//! are rejected here and never reach the scheduler.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_ok, api_success};
use crate::api::stream::{stream_offline, stream_song, tts_audio};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::{AirwaveError, AirwaveResult};
use crate::model::Schedule;
use crate::protocol_constants::{MAX_SONG_COUNT, MAX_VOLUME, MIN_SONG_COUNT, SERVICE_ID};
use crate::services::scheduler::parse_cron;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/queue", get(get_queue))
        .route("/api/recently-played", get(get_recently_played))
        .route(
            "/api/schedules",
            get(list_schedules).post(create_schedule),
        )
        .route(
            "/api/schedules/{id}",
            put(update_schedule).delete(delete_schedule),
        )
        .route("/api/schedules/reload", post(reload_schedules))
        .route("/api/playback/next", post(playback_next))
        .route("/api/playback/play/{song_id}", post(playback_play))
        .route("/api/playback/pause", post(playback_pause))
        .route("/api/playback/resume", post(playback_resume))
        .route("/api/playback/stop", post(playback_stop))
        .route("/api/playback/volume", post(playback_volume))
        .route("/stream/{song_id}", get(stream_song))
        .route("/stream-offline/{filename}", get(stream_offline))
        .route("/tts/{filename}", get(tts_audio))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Health & read-only views
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe plus a few operational counters.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "listeners": state.ws_manager.connection_count(),
        "schedules": state.scheduler.job_count(),
    }))
}

/// The visible voting queue, in selection order.
async fn get_queue(State(state): State<AppState>) -> AirwaveResult<impl IntoResponse> {
    let queue = state.songs.queue().await?;
    Ok(api_success(json!({ "queue": queue })))
}

/// Most recently aired songs, newest first.
async fn get_recently_played(State(state): State<AppState>) -> AirwaveResult<impl IntoResponse> {
    let songs = state.songs.recently_played(20).await?;
    Ok(api_success(json!({ "recentlyPlayed": songs })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Schedule CRUD (admin boundary)
// ─────────────────────────────────────────────────────────────────────────────

/// Input shape for schedule create/update.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleInput {
    name: String,
    cron_expr: String,
    volume: u8,
    song_count: u32,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

impl ScheduleInput {
    /// Rejects invalid input before it reaches the scheduler.
    fn validate(&self) -> AirwaveResult<()> {
        parse_cron(&self.cron_expr)?;
        if self.volume > MAX_VOLUME {
            return Err(AirwaveError::InvalidRequest(format!(
                "volume must be 0-{}, got {}",
                MAX_VOLUME, self.volume
            )));
        }
        if !(MIN_SONG_COUNT..=MAX_SONG_COUNT).contains(&self.song_count) {
            return Err(AirwaveError::InvalidRequest(format!(
                "song count must be {}-{}, got {}",
                MIN_SONG_COUNT, MAX_SONG_COUNT, self.song_count
            )));
        }
        Ok(())
    }
}

async fn list_schedules(State(state): State<AppState>) -> AirwaveResult<impl IntoResponse> {
    let schedules = state.schedules.list().await?;
    Ok(api_success(json!({ "schedules": schedules })))
}

async fn create_schedule(
    State(state): State<AppState>,
    axum::Json(input): axum::Json<ScheduleInput>,
) -> AirwaveResult<impl IntoResponse> {
    input.validate()?;

    let schedule = state
        .schedules
        .create(Schedule {
            id: 0,
            name: input.name,
            cron_expr: input.cron_expr,
            volume: input.volume,
            song_count: input.song_count,
            active: input.active,
            last_run: None,
            next_run: None,
        })
        .await?;

    if schedule.active {
        state.scheduler.add_job(&schedule).await?;
    }
    Ok(api_success(json!({ "schedule": schedule })))
}

async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    axum::Json(input): axum::Json<ScheduleInput>,
) -> AirwaveResult<impl IntoResponse> {
    input.validate()?;

    let existing = state
        .schedules
        .get(id)
        .await?
        .ok_or(AirwaveError::ScheduleNotFound(id))?;

    let updated = Schedule {
        id,
        name: input.name,
        cron_expr: input.cron_expr,
        volume: input.volume,
        song_count: input.song_count,
        active: input.active,
        last_run: existing.last_run,
        next_run: existing.next_run,
    };
    state.schedules.update(updated.clone()).await?;

    if updated.active {
        state.scheduler.add_job(&updated).await?;
    } else {
        state.scheduler.remove_job(id).await;
    }
    Ok(api_success(json!({ "schedule": updated })))
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AirwaveResult<impl IntoResponse> {
    state.scheduler.remove_job(id).await;
    state.schedules.delete(id).await?;
    Ok(api_ok())
}

async fn reload_schedules(State(state): State<AppState>) -> AirwaveResult<impl IntoResponse> {
    state.scheduler.reload().await?;
    Ok(api_success(json!({ "schedules": state.scheduler.job_count() })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback commands (admin boundary)
// ─────────────────────────────────────────────────────────────────────────────

async fn playback_next(State(state): State<AppState>) -> impl IntoResponse {
    state.controller.play_top_now().await;
    api_ok()
}

async fn playback_play(
    State(state): State<AppState>,
    Path(song_id): Path<i64>,
) -> AirwaveResult<impl IntoResponse> {
    state.controller.play_specific(song_id).await?;
    Ok(api_ok())
}

async fn playback_pause(State(state): State<AppState>) -> impl IntoResponse {
    state.controller.pause().await;
    api_ok()
}

async fn playback_resume(State(state): State<AppState>) -> impl IntoResponse {
    state.controller.resume().await;
    api_ok()
}

async fn playback_stop(State(state): State<AppState>) -> impl IntoResponse {
    state.controller.stop().await;
    api_ok()
}

/// Input shape for volume changes.
#[derive(Deserialize)]
struct VolumeInput {
    volume: u8,
}

async fn playback_volume(
    State(state): State<AppState>,
    axum::Json(input): axum::Json<VolumeInput>,
) -> AirwaveResult<impl IntoResponse> {
    if input.volume > MAX_VOLUME {
        return Err(AirwaveError::InvalidRequest(format!(
            "volume must be 0-{}, got {}",
            MAX_VOLUME, input.volume
        )));
    }
    state.controller.set_volume(input.volume).await;
    Ok(api_ok())
}
