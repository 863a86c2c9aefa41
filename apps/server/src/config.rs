//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP port to bind. 0 lets the OS pick an ephemeral port.
    /// Override: `STREAMCAST_BIND_PORT`
    pub bind_port: u16,

    /// Shared passphrase clients must present to derive the session cipher.
    /// Override: `STREAMCAST_PASSPHRASE`
    pub passphrase: String,

    /// Name advertised in discovery/HELLO replies.
    pub server_name: String,

    /// Session idle timeout, in seconds, before a subscriber is reaped.
    pub session_timeout_secs: u64,

    /// Codec tag advertised for the demo video stream (`StreamId::DEFAULT`).
    pub video_codec: String,

    /// Advertised resolution width/height for the demo video stream.
    pub video_width: u32,
    pub video_height: u32,

    /// Advertised frame rate for the demo video stream.
    pub video_fps: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 0,
            passphrase: String::new(),
            server_name: "streamcast-server".to_string(),
            session_timeout_secs: 30,
            video_codec: "h264".to_string(),
            video_width: 1920,
            video_height: 1080,
            video_fps: 60,
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
        if let Ok(val) = std::env::var("STREAMCAST_BIND_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("STREAMCAST_PASSPHRASE") {
            self.passphrase = val;
        }

        if let Ok(val) = std::env::var("STREAMCAST_SESSION_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.session_timeout_secs = secs;
            }
        }
    }

    /// Converts to streamcast-core's `Config` type.
    pub fn to_core_config(&self) -> streamcast_core::Config {
        streamcast_core::Config {
            port: self.bind_port,
            passphrase: self.passphrase.clone(),
            session_timeout_secs: self.session_timeout_secs,
            ..Default::default()
        }
    }
}
