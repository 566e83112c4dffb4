//! Centralized error types for the Airwave core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//!
//! The orchestration services (pre-fetch, playback controller) never surface
//! these errors across their public entry points; failures there become
//! events and state. This type exists for the HTTP/WS boundary and for
//! startup wiring.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::extract::ExtractError;
use crate::store::StoreError;
use crate::tts::TtsError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "store_io_failed",
            Self::Corrupt(_) => "store_corrupt",
            Self::NotFound(_) => "store_not_found",
        }
    }
}

impl ErrorCode for ExtractError {
    fn code(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "extractor_unavailable",
            Self::Failed(_) => "extraction_failed",
            Self::Timeout => "extraction_timeout",
            Self::NoUrl => "no_stream_url",
        }
    }
}

impl ErrorCode for TtsError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "tts_request_failed",
            Self::Synthesis(_) => "tts_synthesis_failed",
            Self::Cache(_) => "tts_cache_failed",
        }
    }
}

/// Application-wide error type for the Airwave server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AirwaveError {
    /// Requested schedule does not exist.
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(i64),

    /// Requested song does not exist.
    #[error("Song not found: {0}")]
    SongNotFound(i64),

    /// Client sent an invalid or malformed request (bad cron expression,
    /// volume outside 0-100, song count outside 1-10).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The caller is not the active broadcaster.
    #[error("Not the active broadcaster")]
    NotBroadcaster,

    /// Stream URL extraction failed or timed out.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// Announcement synthesis failed.
    #[error("TTS failed: {0}")]
    Tts(String),

    /// Persistence layer failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AirwaveError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ScheduleNotFound(_) => "schedule_not_found",
            Self::SongNotFound(_) => "song_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotBroadcaster => "not_broadcaster",
            Self::Extraction(_) => "extraction_failed",
            Self::Tts(_) => "tts_failed",
            Self::Store(_) => "store_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ScheduleNotFound(_) | Self::SongNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotBroadcaster => StatusCode::FORBIDDEN,
            Self::Extraction(_) | Self::Tts(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type AirwaveResult<T> = Result<T, AirwaveError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for AirwaveError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AirwaveError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<ExtractError> for AirwaveError {
    fn from(err: ExtractError) -> Self {
        Self::Extraction(err.to_string())
    }
}

impl From<TtsError> for AirwaveError {
    fn from(err: TtsError) -> Self {
        Self::Tts(err.to_string())
    }
}
