//! Airwave Core - shared library for the Airwave radio server.
//!
//! Airwave is a shared radio-style music server: listeners vote on a song
//! queue and a single broadcaster (the admin) airs the winning tracks to
//! every connected listener in lockstep. This crate holds the playback
//! orchestration core; the standalone server binary wires it up.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`services::scheduler`]: cron-driven job pairs (main firing + T-5m pre-fetch)
//! - [`services::prefetch`]: song reservation, stream resolution, announcements
//! - [`services::playback`]: the authoritative playback controller and bursts
//! - [`services::admin_arbiter`]: single-broadcaster arbitration with grace window
//! - [`events`] / [`hub`]: typed event contract and listener fan-out
//! - [`store`]: persistence interfaces plus the JSON-file backend
//! - [`extract`]: subprocess stream URL extractor behind a TTL cache
//! - [`tts`]: DJ announcement templating and cached synthesis
//! - [`api`]: HTTP routes and the WebSocket wire protocol
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple the orchestration core from
//! external collaborators:
//!
//! - [`SongStore`](store::SongStore), [`ScheduleStore`](store::ScheduleStore),
//!   [`PlaybackStateStore`](store::PlaybackStateStore), [`ChatStore`](store::ChatStore)
//! - [`StreamUrlExtractor`](extract::StreamUrlExtractor)
//! - [`TtsClient`](tts::TtsClient)
//! - [`EventSink`](events::EventSink)
//!
//! Each trait has a default implementation suitable for the standalone
//! server; tests substitute in-memory fakes.

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod error;
pub mod events;
pub mod extract;
pub mod hub;
pub mod model;
pub mod protocol_constants;
pub mod services;
pub mod state;
pub mod store;
pub mod tts;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_fixtures;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState, ServerError, WsConnectionManager};
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use error::{AirwaveError, AirwaveResult, ErrorCode};
pub use events::{EventSink, ServerEvent};
pub use hub::BroadcastHub;
pub use model::{Announcement, PlaybackState, PreparedSlot, Schedule, Song, SongSummary};
pub use state::Config;
pub use utils::now_millis;

// Re-export service types
pub use services::{AdminArbiter, AttachOutcome, PlaybackController, PrefetchService, Scheduler};

// Re-export external-interface traits
pub use extract::{StreamResolver, StreamUrlCache, StreamUrlExtractor, YtDlpExtractor};
pub use store::{ChatStore, MusicLibrary, PlaybackStateStore, ScheduleStore, SongStore};
pub use tts::{Announcer, TtsClient};
