//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to (0 = auto-allocate).
    /// Override: `AIRWAVE_BIND_PORT`
    pub bind_port: u16,

    /// Directory for persisted stores (songs, schedules, playback state).
    /// Override: `AIRWAVE_DATA_DIR`
    pub data_dir: PathBuf,

    /// Directory of local audio files used as offline fallback.
    /// Override: `AIRWAVE_LIBRARY_DIR`
    pub library_dir: PathBuf,

    /// Directory for cached announcement audio.
    pub tts_cache_dir: Option<PathBuf>,

    /// Extractor binary resolving platform URLs to direct audio URLs.
    /// Override: `AIRWAVE_EXTRACTOR_BIN`
    pub extractor_bin: String,

    /// TTS synthesis endpoint. Unset disables audio announcements
    /// (dedications degrade to text-only).
    /// Override: `AIRWAVE_TTS_ENDPOINT`
    pub tts_endpoint: Option<String>,

    /// Name the DJ introduces itself with.
    pub dj_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 49500,
            data_dir: PathBuf::from("data"),
            library_dir: PathBuf::from("library"),
            tts_cache_dir: None,
            extractor_bin: "yt-dlp".to_string(),
            tts_endpoint: None,
            dj_name: "Airwave".to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AIRWAVE_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("AIRWAVE_DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("AIRWAVE_LIBRARY_DIR") {
            self.library_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("AIRWAVE_EXTRACTOR_BIN") {
            self.extractor_bin = val;
        }

        if let Ok(val) = std::env::var("AIRWAVE_TTS_ENDPOINT") {
            self.tts_endpoint = Some(val);
        }
    }

    /// Converts to airwave-core's Config type.
    pub fn to_core_config(&self) -> airwave_core::Config {
        airwave_core::Config {
            preferred_port: self.bind_port,
            data_dir: self.data_dir.clone(),
            library_dir: self.library_dir.clone(),
            tts_cache_dir: self
                .tts_cache_dir
                .clone()
                .unwrap_or_else(|| self.data_dir.join("tts-cache")),
            extractor_bin: self.extractor_bin.clone(),
            tts_endpoint: self.tts_endpoint.clone(),
            dj_name: self.dj_name.clone(),
            ..Default::default()
        }
    }
}
