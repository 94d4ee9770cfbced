//! Session configuration.
//!
//! ```
//! use guestwire::SessionConfig;
//!
//! let config = SessionConfig::from_json(r#"{"io_url": "http://127.0.0.1:9000/io/", "debug": true}"#).unwrap();
//! assert!(config.debug);
//! assert_eq!(config.recv_timeout_ms, 50_000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{GuestwireError, Result};
use crate::protocol::{HEADER_SIZE, MAX_FRAME_SIZE};
use crate::writer::DEFAULT_CHANNEL_CAPACITY;

/// Default host I/O base URL.
pub const DEFAULT_IO_URL: &str = "http://localhost/io/";

/// Default bound on one blocking data-channel request, in milliseconds.
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 50_000;

/// Tunables for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL for the `run`, `work` and `work/nonblock` endpoints. The
    /// control WebSocket uses the matching `ws`/`wss` scheme.
    pub io_url: String,
    /// Enable guest `debug_write` output.
    pub debug: bool,
    pub recv_timeout_ms: u64,
    /// Capacity of the writer task channel.
    pub channel_capacity: usize,
    pub max_frame_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            io_url: DEFAULT_IO_URL.to_string(),
            debug: false,
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.io_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(GuestwireError::Config(format!(
                "unsupported io_url scheme {:?}",
                url.scheme()
            )));
        }
        if self.recv_timeout_ms == 0 {
            return Err(GuestwireError::Config(
                "recv_timeout_ms must be positive".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(GuestwireError::Config(
                "channel_capacity must be positive".to_string(),
            ));
        }
        if self.max_frame_size <= HEADER_SIZE || self.max_frame_size > MAX_FRAME_SIZE {
            return Err(GuestwireError::Config(format!(
                "max_frame_size must be in {}..={}, got {}",
                HEADER_SIZE + 1,
                MAX_FRAME_SIZE,
                self.max_frame_size
            )));
        }
        Ok(())
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.io_url, "http://localhost/io/");
        assert_eq!(config.recv_timeout(), Duration::from_secs(50));
        assert_eq!(config.max_frame_size, 65536);
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = SessionConfig::from_json(r#"{"recv_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.recv_timeout_ms, 250);
        assert_eq!(config.channel_capacity, 1024);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let config = SessionConfig::from_json(r#"{"io_url": "https://example.com/io/", "extra": 1}"#)
            .unwrap();
        assert_eq!(config.io_url, "https://example.com/io/");
    }

    #[test]
    fn test_invalid_values_rejected() {
        for json in [
            r#"{"io_url": "ftp://example.com/"}"#,
            r#"{"io_url": "nope"}"#,
            r#"{"recv_timeout_ms": 0}"#,
            r#"{"channel_capacity": 0}"#,
            r#"{"max_frame_size": 70000}"#,
            r#"{"max_frame_size": 8}"#,
        ] {
            assert!(SessionConfig::from_json(json).is_err(), "accepted {}", json);
        }
    }

    #[test]
    fn test_malformed_json_is_json_error() {
        let err = SessionConfig::from_json("{").unwrap_err();
        assert!(matches!(err, GuestwireError::Json(_)));
    }
}
