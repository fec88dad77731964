use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vmcore::compress::CompressionConfig;
use vmcore::render::{WaveformColors, parse_hex_color};

pub const APP_NAME: &str = "voicemsg";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Decides where cached attachments live and whether scrubbing locks the
/// page scroll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Desktop,
    Mobile,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(any(target_os = "android", target_os = "ios")) {
            Platform::Mobile
        } else {
            Platform::Desktop
        }
    }

    pub fn is_mobile(self) -> bool {
        self == Platform::Mobile
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaveformConfig {
    pub height: u32,
    pub played_color: String,
    pub unplayed_color: String,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            height: 24,
            played_color: "#13987f".to_string(),
            unplayed_color: "#9ca3af".to_string(),
        }
    }
}

impl WaveformConfig {
    pub fn colors(&self) -> Result<WaveformColors, ConfigError> {
        let parse = |value: &str| {
            parse_hex_color(value)
                .ok_or_else(|| ConfigError::Invalid(format!("bad color {value:?}")))
        };
        Ok(WaveformColors {
            played: parse(&self.played_color)?,
            unplayed: parse(&self.unplayed_color)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VoiceConfig {
    pub user_id: String,
    pub platform: Platform,
    /// Overrides the desktop cache root.
    pub app_cache_dir: Option<PathBuf>,
    /// Overrides the mobile data root.
    pub app_data_dir: Option<PathBuf>,
    pub compression: CompressionConfig,
    pub waveform: WaveformConfig,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            user_id: "default".to_string(),
            platform: Platform::current(),
            app_cache_dir: None,
            app_data_dir: None,
            compression: CompressionConfig::default(),
            waveform: WaveformConfig::default(),
        }
    }
}

impl VoiceConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.user_id.is_empty() || self.user_id.contains(['/', '\\']) || self.user_id == ".." {
            return Err(ConfigError::Invalid(format!(
                "user id {:?} cannot name a directory",
                self.user_id
            )));
        }
        self.compression
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.waveform.colors()?;
        Ok(())
    }

    /// App-data root on mobile, app-cache root on desktop.
    pub fn base_dir(&self) -> PathBuf {
        let (explicit, platform_default) = match self.platform {
            Platform::Mobile => (&self.app_data_dir, dirs::data_dir()),
            Platform::Desktop => (&self.app_cache_dir, dirs::cache_dir()),
        };
        explicit
            .clone()
            .or_else(|| platform_default.map(|dir| dir.join(APP_NAME)))
            .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
    }

    pub fn cache_layout(&self) -> CacheLayout {
        CacheLayout::new(self.base_dir(), &self.user_id)
    }
}

/// Per-user audio cache location: `{base}/cache/{user}/audio`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheLayout {
    base_dir: PathBuf,
    user_id: String,
}

impl CacheLayout {
    pub fn new(base_dir: impl Into<PathBuf>, user_id: &str) -> Self {
        Self {
            base_dir: base_dir.into(),
            user_id: user_id.to_string(),
        }
    }

    /// Directory relative to the base, as recorded in `cache_path`.
    pub fn relative_dir(&self) -> String {
        format!("cache/{}/audio/", self.user_id)
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.base_dir
            .join("cache")
            .join(&self.user_id)
            .join("audio")
    }

    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.audio_dir().join(file_name)
    }
}
