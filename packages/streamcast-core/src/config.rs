//! Runtime configuration for the streaming core.
//!
//! Plain serde-derived structs with a hand-written `Default` and a
//! `validate()` that returns a `Result<(), String>` rather than a
//! `StreamError`, since validation runs before anything in the crate's error
//! taxonomy would make sense (there is no session or transport yet to attach
//! a `StreamError` to).

use serde::{Deserialize, Serialize};

use crate::pipeline::sync::SyncConfig;
use crate::protocol::fragment::FragmentConfig;

/// Top-level configuration for a streaming session's transport and pipeline.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// UDP/TCP port to listen on (server) or connect to (client). 0 lets the
    /// OS pick an ephemeral port for discovery/testing.
    pub port: u16,

    /// Shared passphrase used to derive the session cipher key. Required;
    /// there is no "unencrypted session" mode.
    #[serde(default)]
    pub passphrase: String,

    /// Session idle timeout before the session transitions to `TimedOut`.
    pub session_timeout_secs: u64,

    /// Client turnaround-latency heartbeat interval.
    pub heartbeat_interval_ms: u64,

    /// How long a subscribed stream may go without a new frame before the
    /// client's frame-number watchdog considers it stalled.
    pub frame_watchdog_timeout_ms: u64,

    /// Minimum time between repeated `FORCE_IDR` requests for the same
    /// stalled stream, so a watchdog trip doesn't spam the server every tick.
    pub frame_watchdog_cooloff_ms: u64,

    /// Fragmentation/reassembly tuning.
    #[serde(default)]
    pub fragment: FragmentConfig,

    /// A/V synchronizer tuning.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Maximum `SubmitInput` retry attempts a pipeline slot makes before
    /// surfacing `InputFull` to its caller.
    pub max_submit_input_attempts: u32,

    /// Backoff between `QueryOutput` polls, in milliseconds.
    pub query_output_backoff_ms: u64,

    /// Capacity of the internal event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Config {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns a human-readable message describing the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.passphrase.is_empty() {
            return Err("passphrase must not be empty".to_string());
        }
        if self.session_timeout_secs == 0 {
            return Err("session_timeout_secs must be >= 1".to_string());
        }
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat_interval_ms must be >= 1".to_string());
        }
        if self.frame_watchdog_timeout_ms == 0 {
            return Err("frame_watchdog_timeout_ms must be >= 1".to_string());
        }
        if self.frame_watchdog_cooloff_ms == 0 {
            return Err("frame_watchdog_cooloff_ms must be >= 1".to_string());
        }
        if self.max_submit_input_attempts == 0 {
            return Err("max_submit_input_attempts must be >= 1".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        self.fragment.validate()?;
        self.sync.validate()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 0,
            passphrase: String::new(),
            session_timeout_secs: 30,
            heartbeat_interval_ms: 16,
            frame_watchdog_timeout_ms: 2_000,
            frame_watchdog_cooloff_ms: 3_000,
            fragment: FragmentConfig::default(),
            sync: SyncConfig::default(),
            max_submit_input_attempts: 100,
            query_output_backoff_ms: 1,
            event_channel_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_rejects_empty_passphrase() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_with_passphrase_is_valid() {
        let mut config = Config::default();
        config.passphrase = "correct horse battery staple".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_heartbeat_interval_is_rejected() {
        let mut config = Config::default();
        config.passphrase = "x".to_string();
        config.heartbeat_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
