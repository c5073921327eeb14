use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capability::{Encoding, Resolution};
use crate::device::DeviceFilter;
use crate::error::{Result, UvcError};

/// Hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Capture format preferences
    pub video: VideoConfig,
    /// Permission prompt settings
    pub permission: PermissionConfig,
    /// Audio capture settings
    pub audio: AudioConfig,
    /// Device allow/deny rules, evaluated in order (empty accepts all)
    pub filters: Vec<DeviceFilter>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            video: VideoConfig::default(),
            permission: PermissionConfig::default(),
            audio: AudioConfig::default(),
            filters: Vec::new(),
        }
    }
}

impl HubConfig {
    /// Reject values the coordinator cannot work with
    pub fn validate(&self) -> Result<()> {
        self.video.validate()
    }
}

/// Video capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Resolution requested when no consumer asks for one
    pub default_width: u32,
    pub default_height: u32,
    /// Try H.264 before MJPEG
    pub prefer_h264: bool,
    /// Accepted frame rate range
    pub min_fps: f32,
    pub max_fps: f32,
    /// Frame pump tick interval
    pub frame_interval_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            default_width: 1280,
            default_height: 720,
            prefer_h264: false,
            min_fps: 0.1,
            max_fps: 121.0,
            frame_interval_ms: 16,
        }
    }
}

impl VideoConfig {
    pub fn default_resolution(&self) -> Resolution {
        Resolution::new(self.default_width, self.default_height)
    }

    /// Encodings to negotiate, most preferred first
    pub fn encoding_order(&self) -> [Encoding; 2] {
        Encoding::negotiation_order(self.prefer_h264)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    fn validate(&self) -> Result<()> {
        if !self.default_resolution().is_valid() {
            return Err(UvcError::Config(format!(
                "default resolution {} must be non-zero",
                self.default_resolution()
            )));
        }
        if !(self.min_fps > 0.0 && self.min_fps <= self.max_fps) {
            return Err(UvcError::Config(format!(
                "invalid fps range {}..{}",
                self.min_fps, self.max_fps
            )));
        }
        if self.frame_interval_ms == 0 {
            return Err(UvcError::Config(
                "frame_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Permission prompt configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// How long to wait for the user to answer (clamped to 500..=30000)
    pub timeout_ms: u64,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl PermissionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Audio capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Start audio for consumers that want it
    pub enabled: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.video.default_resolution(), Resolution::HD720);
        assert_eq!(
            config.video.encoding_order(),
            [Encoding::Mjpeg, Encoding::H264]
        );
        assert_eq!(config.permission.timeout(), Duration::from_secs(30));
        assert!(config.audio.enabled);
        assert!(config.filters.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: HubConfig = serde_json::from_str(
            r#"{"video": {"prefer_h264": true}, "filters": [{"vendor_id": 1482, "exclude": true}]}"#,
        )
        .unwrap();
        assert!(config.video.prefer_h264);
        assert_eq!(config.video.default_width, 1280);
        assert_eq!(config.filters.len(), 1);
        assert!(config.filters[0].exclude);
        assert_eq!(config.filters[0].product_id, None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = HubConfig::default();
        config.video.default_width = 0;
        assert!(matches!(config.validate(), Err(UvcError::Config(_))));

        let mut config = HubConfig::default();
        config.video.min_fps = 60.0;
        config.video.max_fps = 30.0;
        assert!(matches!(config.validate(), Err(UvcError::Config(_))));
    }
}
