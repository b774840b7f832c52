//! Stream configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Snapshot of the streaming configuration.
///
/// The session controller holds exactly one current value and is its sole
/// writer; updates always produce a new snapshot via [`StreamConfig::merged`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Inference server base URL (http/https; upgraded to ws/wss on connect)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Frames per second to sample and send
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,

    /// JPEG quality factor, in (0, 1]
    #[serde(default = "default_quality")]
    pub quality: f32,

    /// Resized frame width in pixels
    #[serde(default = "default_width")]
    pub width: u32,

    /// Resized frame height in pixels
    #[serde(default = "default_height")]
    pub height: u32,
}

/// Partial configuration update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamConfigUpdate {
    pub server_url: Option<String>,
    pub frame_rate: Option<f64>,
    pub quality: Option<f32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

fn default_server_url() -> String {
    "http://localhost:5000".to_string()
}
fn default_frame_rate() -> f64 {
    10.0
}
fn default_quality() -> f32 {
    0.7
}
fn default_width() -> u32 {
    320
}
fn default_height() -> u32 {
    240
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            frame_rate: default_frame_rate(),
            quality: default_quality(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl StreamConfig {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Loads configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: StreamConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates all fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.is_empty() {
            return Err(ConfigError::Invalid("server_url must not be empty".into()));
        }

        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "frame_rate must be > 0, got {}",
                self.frame_rate
            )));
        }

        if !(self.quality > 0.0 && self.quality <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "quality must be in (0, 1], got {}",
                self.quality
            )));
        }

        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(
                "width and height must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Returns a new snapshot with the update applied on top of `self`.
    pub fn merged(&self, update: &StreamConfigUpdate) -> StreamConfig {
        StreamConfig {
            server_url: update
                .server_url
                .clone()
                .unwrap_or_else(|| self.server_url.clone()),
            frame_rate: update.frame_rate.unwrap_or(self.frame_rate),
            quality: update.quality.unwrap_or(self.quality),
            width: update.width.unwrap_or(self.width),
            height: update.height.unwrap_or(self.height),
        }
    }

    /// Sampling interval derived from the frame rate.
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.frame_rate)
    }

    /// JPEG quality factor mapped to the encoder's 1-100 scale.
    pub fn jpeg_quality(&self) -> u8 {
        ((self.quality * 100.0).round() as u8).clamp(1, 100)
    }
}

/// Decides whether applying `new` on top of `old` requires a full transport
/// restart. Only connection identity (`server_url`) and sampling cadence
/// (`frame_rate`) force one; size and quality changes apply live.
pub fn needs_restart(old: &StreamConfig, new: &StreamConfig) -> bool {
    old.server_url != new.server_url || old.frame_rate != new.frame_rate
}
