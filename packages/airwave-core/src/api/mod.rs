//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::extract::StreamResolver;
use crate::hub::BroadcastHub;
use crate::services::{AdminArbiter, PlaybackController, PrefetchService, Scheduler};
use crate::state::Config;
use crate::store::{MusicLibrary, ScheduleStore, SongStore};
use crate::tts::Announcer;

pub mod http;
pub mod response;
mod stream;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Voting queue store.
    pub songs: Arc<dyn SongStore>,
    /// Schedule store (CRUD boundary writes, scheduler bookkeeping).
    pub schedules: Arc<dyn ScheduleStore>,
    /// The authoritative playback controller.
    pub controller: Arc<PlaybackController>,
    /// Pre-fetch pipeline (locked-slot snapshots).
    pub prefetch: Arc<PrefetchService>,
    /// Cron scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Single-broadcaster arbiter.
    pub arbiter: Arc<AdminArbiter>,
    /// Fan-out channel for listener events.
    pub hub: Arc<BroadcastHub>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Cache-first stream URL resolution.
    pub resolver: Arc<StreamResolver>,
    /// Offline fallback library.
    pub library: Arc<MusicLibrary>,
    /// Announcement cache access for `/tts/{file}`.
    pub announcer: Arc<Announcer>,
    /// Application configuration.
    pub config: Arc<RwLock<Config>>,
}

impl AppState {
    /// Builds the API state from the bootstrapped service container.
    pub fn new(services: &crate::BootstrappedServices, config: Arc<RwLock<Config>>) -> Self {
        Self {
            songs: Arc::clone(&services.songs),
            schedules: Arc::clone(&services.schedules),
            controller: Arc::clone(&services.controller),
            prefetch: Arc::clone(&services.prefetch),
            scheduler: Arc::clone(&services.scheduler),
            arbiter: Arc::clone(&services.arbiter),
            hub: Arc::clone(&services.hub),
            ws_manager: Arc::clone(&services.ws_manager),
            resolver: Arc::clone(&services.resolver),
            library: Arc::clone(&services.library),
            announcer: Arc::clone(&services.announcer),
            config,
        }
    }
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let preferred_port = state.config.read().preferred_port;
    let (port, listener) = if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        (preferred_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(49500, 49510).await?
    };

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(listener, app).await?;
    Ok(())
}
