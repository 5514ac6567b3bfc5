//! Persisted configuration
//!
//! Stored as TOML under the platform config directory. Every section
//! uses `#[serde(default)]` so older files keep loading after new keys
//! are added.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub cpu: CpuConfig,
    pub debug: DebugConfig,
}

/// General front-end settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Leave the CPU in stepping mode after boot
    pub start_paused: bool,
}

/// Which execution core drives the CPU
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuCore {
    /// Decode and execute one instruction at a time, no caching
    Interpreter,
    /// Cached interpreter blocks with an optional Baseline tier
    #[default]
    Tiered,
}

/// CPU core settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub core: CpuCore,
    /// Run the Baseline tier on its own thread
    pub baseline: bool,
    /// Upper bound on instructions per cached block
    pub max_block_instructions: u32,
    /// Backing store size (in instructions) that forces a compaction
    pub store_capacity: usize,
    /// Timing advances between Baseline handoff attempts
    pub publish_interval: u32,
    /// Associativity of the dispatch victim cache
    pub victim_ways: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            core: CpuCore::Tiered,
            baseline: true,
            max_block_instructions: 1024,
            store_capacity: 1 << 20,
            publish_interval: 64,
            victim_ways: 4,
        }
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Debugging and logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    /// Level for the `ppc` target; unset follows `log_level`
    pub ppc_log_level: Option<LogLevel>,
    /// Level for the `jit` target; unset follows `log_level`
    pub jit_log_level: Option<LogLevel>,
    /// Level for the `timing` target; unset follows `log_level`
    pub timing_log_level: Option<LogLevel>,
    pub log_to_file: bool,
    pub log_path: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            ppc_log_level: None,
            jit_log_level: None,
            timing_log_level: Some(LogLevel::Warn),
            log_to_file: false,
            log_path: PathBuf::from("gekko.log"),
        }
    }
}

impl Config {
    /// Path of the configuration file
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("gekko").join("config.toml"))
    }

    /// Load the configuration file
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Write the configuration file, creating its directory if needed
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.to_toml()?)?;
        tracing::info!("Saved configuration to {}", path.display());
        Ok(())
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        let parsed = Config::from_toml(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed = Config::from_toml(
            r#"
            [cpu]
            core = "Interpreter"
            baseline = false
            "#,
        )
        .unwrap();

        assert_eq!(parsed.cpu.core, CpuCore::Interpreter);
        assert!(!parsed.cpu.baseline);
        assert_eq!(parsed.cpu.max_block_instructions, 1024);
        assert_eq!(parsed.debug.log_level, LogLevel::Info);
        assert_eq!(parsed.debug.timing_log_level, Some(LogLevel::Warn));
        assert!(!parsed.general.start_paused);
    }

    #[test]
    fn test_target_levels_parse() {
        let parsed = Config::from_toml(
            r#"
            [debug]
            jit_log_level = "Trace"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.debug.jit_log_level, Some(LogLevel::Trace));
        assert_eq!(parsed.debug.ppc_log_level, None);
    }

    #[test]
    fn test_invalid_config_is_parse_error() {
        let err = Config::from_toml("[cpu]\ncore = 7").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
