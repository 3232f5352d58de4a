use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::kernel::detection::DEFAULT_DEBOUNCE_MS;
use crate::kernel::level::DEFAULT_DB_OFFSET;
use crate::kernel::segment::{DEFAULT_CAPTURE_WINDOW_MS, DEFAULT_PRE_ROLL_CHUNKS};

pub const DEFAULT_THRESHOLD: u32 = 60;
pub const DEFAULT_TICK_MS: u64 = 100;
pub const DEFAULT_CHUNK_MS: u64 = 1000;
pub const DEFAULT_BLOCK_SIZE: usize = 128;
pub const DEFAULT_RECENT_LIMIT: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub threshold: u32,
    pub tick_ms: u64,
    pub chunk_ms: u64,
    pub debounce_ms: u64,
    pub capture_window_ms: u64,
    pub pre_roll_chunks: usize,
    /// Samples per analysis window fed to the meter.
    pub block_size: usize,
    pub db_offset: f64,
    /// Amplification applied to captured samples before metering and recording.
    pub gain: f32,
    pub recent_limit: usize,
    /// Content-type preferences for captured clips, most preferred first.
    pub encodings: Vec<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            tick_ms: DEFAULT_TICK_MS,
            chunk_ms: DEFAULT_CHUNK_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            capture_window_ms: DEFAULT_CAPTURE_WINDOW_MS,
            pre_roll_chunks: DEFAULT_PRE_ROLL_CHUNKS,
            block_size: DEFAULT_BLOCK_SIZE,
            db_offset: DEFAULT_DB_OFFSET,
            gain: 1.0,
            recent_limit: DEFAULT_RECENT_LIMIT,
            encodings: vec!["audio/wav".to_string(), "audio/L16".to_string()],
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: MonitorConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 || self.chunk_ms == 0 {
            return Err(ConfigError::Invalid("cadences must be non-zero".into()));
        }
        if self.capture_window_ms == 0 {
            return Err(ConfigError::Invalid("capture_window_ms must be non-zero".into()));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be non-zero".into()));
        }
        if !self.gain.is_finite() || self.gain <= 0.0 {
            return Err(ConfigError::Invalid(format!("gain must be positive, got {}", self.gain)));
        }
        if !self.db_offset.is_finite() {
            return Err(ConfigError::Invalid("db_offset must be finite".into()));
        }
        Ok(())
    }
}
