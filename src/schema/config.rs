//! Configuration types for timeline sessions.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ProtocolVersion;

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_replay_tick_ms() -> u64 {
    20
}

fn default_speed_multiplier() -> f64 {
    1.0
}

fn default_parallel_decode_threshold() -> usize {
    4096
}

/// Top-level session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Interval between live samples, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Interval between replay cursor updates, in milliseconds.
    #[serde(default = "default_replay_tick_ms")]
    pub replay_tick_ms: u64,
    /// Initial replay speed multiplier.
    #[serde(default = "default_speed_multiplier")]
    pub speed_multiplier: f64,
    /// Protocol assumed for recorded logs whose metadata omits the version.
    #[serde(default)]
    pub default_log_version: ProtocolVersion,
    /// Region count above which snapshot words are decoded in parallel.
    #[serde(default = "default_parallel_decode_threshold")]
    pub parallel_decode_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            replay_tick_ms: default_replay_tick_ms(),
            speed_multiplier: default_speed_multiplier(),
            default_log_version: ProtocolVersion::LATEST,
            parallel_decode_threshold: default_parallel_decode_threshold(),
        }
    }
}

impl SessionConfig {
    /// Load and validate a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    pub fn replay_tick(&self) -> Duration {
        Duration::from_millis(self.replay_tick_ms)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        if self.replay_tick_ms == 0 {
            return Err(ConfigError::InvalidReplayTick);
        }
        if !self.speed_multiplier.is_finite() || self.speed_multiplier <= 0.0 {
            return Err(ConfigError::InvalidSpeed(self.speed_multiplier));
        }
        Ok(())
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Poll interval must be non-zero")]
    InvalidPollInterval,
    #[error("Replay tick must be non-zero")]
    InvalidReplayTick,
    #[error("Speed multiplier must be finite and positive, got {0}")]
    InvalidSpeed(f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"speed_multiplier": 4.0}"#).unwrap();
        assert_eq!(config.speed_multiplier, 4.0);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.default_log_version, ProtocolVersion::V2);

        let config: SessionConfig = serde_json::from_str(r#"{"default_log_version": "V1"}"#).unwrap();
        assert_eq!(config.default_log_version, ProtocolVersion::V1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SessionConfig {
            speed_multiplier: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSpeed(_))));

        let config = SessionConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPollInterval)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"poll_interval_ms": 250, "replay_tick_ms": 10}}"#).unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.replay_tick_ms, 10);

        let mut bad = NamedTempFile::new().unwrap();
        write!(bad, r#"{{"replay_tick_ms": 0}}"#).unwrap();
        assert!(matches!(
            SessionConfig::load(bad.path()),
            Err(ConfigError::InvalidReplayTick)
        ));
    }
}
