//! Relay configuration.
//!
//! Options can come from an optional JSON file, with CLI flags taking
//! precedence. All fields have working defaults so a bare `framecast relay`
//! serves `ws://127.0.0.1:5000/ws` with echo disabled.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::protocol::{DEFAULT_KEEPALIVE, DEFAULT_LISTEN, MAX_FRAME_BYTES};

/// Options fixed at relay startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the relay listens on.
    pub listen: String,
    /// Whether a sender receives its own frames back.
    pub echo_to_sender: bool,
    /// Seconds between liveness probes to each connection.
    pub keepalive_secs: u64,
    /// Largest accepted binary message; larger frames are dropped.
    pub max_frame_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            echo_to_sender: false,
            keepalive_secs: DEFAULT_KEEPALIVE.as_secs(),
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

impl RelayConfig {
    /// Read a config file, or defaults if `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                let config: RelayConfig = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RelayConfig::default();
        assert_eq!(config.listen, "127.0.0.1:5000");
        assert!(!config.echo_to_sender);
        assert_eq!(config.max_frame_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"echo_to_sender": true, "listen": "0.0.0.0:9000"}}"#).unwrap();

        let config = RelayConfig::load(Some(file.path())).unwrap();
        assert!(config.echo_to_sender);
        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.keepalive_secs, 30);
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = RelayConfig::load(Some(Path::new("/nonexistent/framecast.json")));
        assert!(result.is_err());
    }
}
