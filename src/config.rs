//! Replay engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config load errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },
}

/// Tunables for the replay service.
///
/// `publish_timer_ms` sets the emission tick: with 10ms, due events go
/// out in 10ms publication windows and the loop sleeps in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Emission loop tick interval in milliseconds
    #[serde(default = "default_publish_timer_ms")]
    pub publish_timer_ms: u64,

    /// Bounded capacity of each session's output channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Idle time after which a session is evicted, in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// How often the eviction sweep runs, in seconds
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    /// Market data file to load at startup
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
}

fn default_publish_timer_ms() -> u64 {
    10
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_session_ttl_secs() -> u64 {
    300
}

fn default_eviction_interval_secs() -> u64 {
    30
}

fn default_data_path() -> PathBuf {
    PathBuf::from("marketdata.csv")
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            publish_timer_ms: default_publish_timer_ms(),
            channel_capacity: default_channel_capacity(),
            session_ttl_secs: default_session_ttl_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
            data_path: default_data_path(),
        }
    }
}

impl ReplayConfig {
    /// Load from a JSON file; absent fields fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.publish_timer_ms == 0 {
            return Err(ConfigError::NonPositive {
                field: "publish_timer_ms",
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::NonPositive {
                field: "channel_capacity",
            });
        }
        if self.session_ttl_secs == 0 {
            return Err(ConfigError::NonPositive {
                field: "session_ttl_secs",
            });
        }
        if self.eviction_interval_secs == 0 {
            return Err(ConfigError::NonPositive {
                field: "eviction_interval_secs",
            });
        }
        Ok(())
    }

    pub fn publish_timer(&self) -> Duration {
        Duration::from_millis(self.publish_timer_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}
