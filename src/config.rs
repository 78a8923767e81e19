//! Configuration for the scheduling engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default cooldown tick in milliseconds.
pub const DEFAULT_TICK_MS: u64 = 10;

/// Default number of ticks between clock drift measurements.
pub const DEFAULT_CLOCK_ADJUST_INTERVAL: u32 = 1000;

/// Engine-wide settings shared by every schedule in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Polling period of every schedule state machine, in milliseconds.
    ///
    /// Triggers fire on multiples of this tick, so it bounds trigger accuracy.
    pub tick_ms: u64,
    /// Number of ticks between two wall-clock drift measurements.
    pub clock_adjust_interval: u32,
    /// Emit countdown progress events (time to next session/trigger, time left).
    ///
    /// Triggers, lifecycle and finish events are always emitted.
    pub emit_progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
            clock_adjust_interval: DEFAULT_CLOCK_ADJUST_INTERVAL,
            emit_progress: true,
        }
    }
}

impl EngineConfig {
    /// Tick period as a signed millisecond count, for countdown arithmetic.
    pub fn tick(&self) -> i64 {
        i64::try_from(self.tick_ms).unwrap_or(i64::MAX)
    }

    /// Check the values that would stall or break the tick loop.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Config`](crate::error::ScheduleError::Config) when
    /// `tick_ms` or `clock_adjust_interval` is zero.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.tick_ms == 0 {
            return Err(crate::error::ScheduleError::Config(
                "tick_ms must be greater than zero".to_owned(),
            ));
        }
        if self.clock_adjust_interval == 0 {
            return Err(crate::error::ScheduleError::Config(
                "clock_adjust_interval must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::ScheduleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ScheduleError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/tidal/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("tidal").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("tidal")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/tidal-config/config.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_ms, 10);
        assert_eq!(config.clock_adjust_interval, 1000);
        assert!(config.emit_progress);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_tick_is_rejected() {
        let config = EngineConfig {
            tick_ms: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            clock_adjust_interval: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let config = EngineConfig {
            tick_ms: 25,
            clock_adjust_interval: 400,
            emit_progress: false,
        };
        config.save_to_file(&path).expect("save");
        assert!(path.exists());

        let loaded = EngineConfig::from_file(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "tick_ms = 20\n").expect("write");

        let loaded = EngineConfig::from_file(&path).expect("load");
        assert_eq!(loaded.tick_ms, 20);
        assert_eq!(loaded.clock_adjust_interval, DEFAULT_CLOCK_ADJUST_INTERVAL);
        assert!(loaded.emit_progress);
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").expect("write");

        assert!(EngineConfig::from_file(&path).is_err());
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = EngineConfig::from_file(std::path::Path::new("/nonexistent/tidal/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = EngineConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("tidal"));
    }
}
