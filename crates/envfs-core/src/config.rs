//! Backend tuning knobs, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! [hash]
//! buffer_size = 65536
//! channel_capacity = 64
//!
//! [watch]
//! poll_interval_ms = 500
//! event_capacity = 1024
//!
//! [temp]
//! max_attempts = 64
//! random_len = 10
//!
//! [remote]
//! stream_capacity = 256
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub hash: HashConfig,
    pub watch: WatchConfig,
    pub temp: TempConfig,
    pub remote: RemoteConfig,
}

/// Directory hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Read buffer per file, in bytes.
    pub buffer_size: usize,
    /// Entries buffered between the walker and the consumer.
    pub channel_capacity: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Poll interval for platforms where notify falls back to polling.
    pub poll_interval_ms: u64,
    /// Events buffered per subscriber before the oldest are dropped.
    pub event_capacity: usize,
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            event_capacity: 1024,
        }
    }
}

/// Temporary entry naming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempConfig {
    pub max_attempts: u32,
    pub random_len: usize,
}

impl Default for TempConfig {
    fn default() -> Self {
        Self {
            max_attempts: 64,
            random_len: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Items buffered per streaming call on the client side.
    pub stream_capacity: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            stream_capacity: 256,
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("hash.buffer_size", self.hash.buffer_size == 0),
            ("hash.channel_capacity", self.hash.channel_capacity == 0),
            ("watch.event_capacity", self.watch.event_capacity == 0),
            ("temp.max_attempts", self.temp.max_attempts == 0),
            ("remote.stream_capacity", self.remote.stream_capacity == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_default() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml_str(
            r#"
            [hash]
            buffer_size = 4096

            [temp]
            random_len = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.hash.buffer_size, 4096);
        assert_eq!(config.hash.channel_capacity, 64);
        assert_eq!(config.temp.random_len, 16);
        assert_eq!(config.watch.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = Config::from_toml_str("[watch]\nevent_capacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("watch.event_capacity"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("envfs.toml");
        std::fs::write(&path, "[remote]\nstream_capacity = 8\n").unwrap();
        assert_eq!(Config::load(&path).unwrap().remote.stream_capacity, 8);
        assert!(matches!(
            Config::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
