use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the upload pipeline client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote service settings
    pub api: ApiConfig,

    /// Audio extraction settings
    pub audio: AudioConfig,

    /// Pipeline behavior settings
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the upload service
    pub base_url: String,

    /// Timeout for each network call (seconds)
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3333".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,

    /// Path to the ffprobe binary
    pub ffprobe_path: String,

    /// Audio codec for the derived track
    pub codec: String,

    /// Target audio bitrate. Low bitrate is fine: the track feeds a
    /// transcription model, not a listener.
    pub bitrate: String,

    /// Number of audio channels
    pub channels: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            codec: "libmp3lame".to_string(),
            bitrate: "20k".to_string(),
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Settle delay between the last remote call and the terminal state
    /// (milliseconds). Cosmetic: eases the final state flash in a UI.
    pub complete_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            complete_delay_ms: 200,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        // Try to load from various locations
        let config_paths = [
            "upload-ai.toml",
            "config/upload-ai.toml",
            "~/.config/upload-ai/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        // Fall back to environment overrides on top of defaults
        Self::from_env()
    }

    /// Load configuration from an explicit file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let config = toml::from_str(&config_str)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("UPLOAD_AI_API_URL") {
            config.api.base_url = base_url;
        }

        if let Ok(timeout) = std::env::var("UPLOAD_AI_API_TIMEOUT") {
            config.api.timeout_secs = timeout.parse().unwrap_or(120);
        }

        if let Ok(ffmpeg) = std::env::var("UPLOAD_AI_FFMPEG") {
            config.audio.ffmpeg_path = ffmpeg;
        }

        if let Ok(ffprobe) = std::env::var("UPLOAD_AI_FFPROBE") {
            config.audio.ffprobe_path = ffprobe;
        }

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.is_empty() {
            return Err(anyhow!("api.base_url must not be empty"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow!("audio.channels must be at least 1"));
        }

        Ok(())
    }
}
