//! Client configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Client configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address to connect to, e.g. `"192.168.1.10:49400"`. Empty
    /// means "discover on the local network instead".
    pub server_addr: String,

    /// Shared passphrase; must match the server's.
    /// Override: `STREAMCAST_PASSPHRASE`
    pub passphrase: String,

    /// Identifier this client presents in DISCOVERY/HELLO.
    pub device_id: String,

    /// Session role: `"viewer"` or `"controller"`.
    pub role: String,

    /// Free-text platform string sent in HELLO.
    pub platform: String,

    /// Stream ID to subscribe to once connected.
    pub stream_id: u32,

    /// How long to wait for discovery replies before giving up, in
    /// milliseconds. Only used when `server_addr` is empty.
    pub discovery_window_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: String::new(),
            passphrase: String::new(),
            device_id: "streamcast-client".to_string(),
            role: "viewer".to_string(),
            platform: "headless".to_string(),
            stream_id: 0,
            discovery_window_ms: 2_000,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("STREAMCAST_SERVER_ADDR") {
            self.server_addr = val;
        }
        if let Ok(val) = std::env::var("STREAMCAST_PASSPHRASE") {
            self.passphrase = val;
        }
    }

    /// Converts to streamcast-core's `Config` type.
    pub fn to_core_config(&self) -> streamcast_core::Config {
        streamcast_core::Config { passphrase: self.passphrase.clone(), ..Default::default() }
    }
}
