//! Relay configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! relay listening on port 8191:
//!
//! ```toml
//! listen_addr = "0.0.0.0:8191"
//! queue_capacity = 64
//! overflow = "disconnect"
//! max_frame_len = 8191
//! log_file = "/var/log/dvap-relay.bin"
//! debug = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dvap_core::MAX_FRAME_LEN;

/// Error type for loading a relay configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What the dispatcher does when a client's outbound queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Disconnect the slow client.
    #[default]
    Disconnect,
    /// Discard the frame for that client only.
    Drop,
}

/// Settings for a [`RelayServer`](crate::RelayServer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the TCP listener binds to.
    pub listen_addr: String,
    /// Frames buffered per client before the overflow policy applies.
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Largest frame a client may send; anything bigger disconnects it.
    pub max_frame_len: usize,
    /// Append every relayed frame's raw bytes to this file.
    pub log_file: Option<PathBuf>,
    /// Log destination calls other than `CQCQCQ`.
    pub debug: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen_addr: "0.0.0.0:8191".to_string(),
            queue_capacity: 64,
            overflow: OverflowPolicy::default(),
            max_frame_len: MAX_FRAME_LEN,
            log_file: None,
            debug: false,
        }
    }
}

impl RelayConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be non-zero".into()));
        }
        if !(2..=MAX_FRAME_LEN).contains(&self.max_frame_len) {
            return Err(ConfigError::Invalid(format!(
                "max_frame_len must be between 2 and {MAX_FRAME_LEN}, got {}",
                self.max_frame_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = RelayConfig::from_toml_str("").unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.listen_addr, "0.0.0.0:8191");
        assert_eq!(config.overflow, OverflowPolicy::Disconnect);
        assert_eq!(config.max_frame_len, 8191);
    }

    #[test]
    fn partial_file_overrides_some_fields() {
        let config = RelayConfig::from_toml_str(
            r#"
            listen_addr = "127.0.0.1:9000"
            overflow = "drop"
            log_file = "/tmp/relay.bin"
            debug = true
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.overflow, OverflowPolicy::Drop);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/relay.bin")));
        assert!(config.debug);
        assert_eq!(config.queue_capacity, 64);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            RelayConfig::from_toml_str("queue_capacity = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RelayConfig::from_toml_str("max_frame_len = 9000"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RelayConfig::from_toml_str("overflow = \"sometimes\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = RelayConfig::load("/nonexistent/dvap-relay.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dvap-relay.toml"));
    }
}
