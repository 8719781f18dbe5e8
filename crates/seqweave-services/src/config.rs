//! Engine configuration stored as TOML under the user config directory

use std::path::{Path, PathBuf};

use seqweave_core::{DEFAULT_PPQN, RecordVelocity};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ppqn: u32,
    pub bpm: f64,
    /// Wall time between clock frames
    pub frame_interval_ms: u64,
    /// Output queue depth; events beyond it are dropped and counted
    pub sink_capacity: usize,
    pub input_capacity: usize,
    pub resume_note_ons: bool,
    pub song_mode: bool,
    pub record_velocity: RecordVelocity,
    pub default_pattern_bars: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ppqn: DEFAULT_PPQN,
            bpm: 120.0,
            frame_interval_ms: 5,
            sink_capacity: 1024,
            input_capacity: 256,
            resume_note_ons: true,
            song_mode: false,
            record_velocity: RecordVelocity::Preserve,
            default_pattern_bars: 1,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ppqn == 0 {
            return Err(ConfigError::Invalid("ppqn must be positive".into()));
        }
        if !(self.bpm > 0.0 && self.bpm.is_finite()) {
            return Err(ConfigError::Invalid(format!("bpm {}", self.bpm)));
        }
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid("frame_interval_ms must be positive".into()));
        }
        if self.sink_capacity == 0 || self.input_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacities must be positive".into()));
        }
        if self.default_pattern_bars == 0 {
            return Err(ConfigError::Invalid("default_pattern_bars must be positive".into()));
        }
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("seqweave")
        .join("config.toml")
}

pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

/// Config from the default location, or defaults if it is missing or bad
pub fn load_or_default() -> EngineConfig {
    let path = config_path();
    if !path.exists() {
        return EngineConfig::default();
    }
    match load_config(&path) {
        Ok(config) => {
            info!(path = %path.display(), "Loaded config");
            config
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Falling back to default config");
            EngineConfig::default()
        }
    }
}

pub fn save_config(config: &EngineConfig, path: &Path) -> Result<(), ConfigError> {
    config.validate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = toml::to_string_pretty(config)?;
    std::fs::write(path, text)?;
    Ok(())
}
