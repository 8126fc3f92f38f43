use std::fmt;

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Web server settings
    pub server: ServerConfig,
    /// Video capture settings
    pub video: VideoConfig,
    /// Capture subprocess settings
    pub capture: CaptureConfig,
}

impl AppConfig {
    /// Reject values a capture attempt could never satisfy.
    pub fn validate(&self) -> Result<(), String> {
        self.video.validate()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            video: VideoConfig::default(),
            capture: CaptureConfig::default(),
        }
    }
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// HTTP port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Video capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Video device (path like /dev/video0, or a bare index)
    pub device: DeviceId,
    /// Resolution width
    pub width: u32,
    /// Resolution height
    pub height: u32,
    /// Frame rate
    pub fps: u32,
}

impl VideoConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("width", self.width),
            ("height", self.height),
            ("fps", self.fps),
        ] {
            if value == 0 {
                return Err(format!("video.{field} must be positive"));
            }
        }
        Ok(())
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            device: DeviceId::default(),
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Capture subprocess configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture tool executable (searched on PATH if not absolute)
    pub tool: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tool: "ffmpeg".to_string(),
        }
    }
}

/// Video device selector: an explicit path or a V4L2 index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DeviceId {
    /// Device node path, e.g. /dev/video0
    Path(String),
    /// Bare index n, resolved to /dev/video{n}
    Index(u32),
}

impl DeviceId {
    /// Resolve to the device node path handed to the capture tool.
    pub fn to_path(&self) -> String {
        match self {
            DeviceId::Path(p) => p.clone(),
            DeviceId::Index(n) => format!("/dev/video{n}"),
        }
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        DeviceId::Path("/dev/video0".to_string())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path())
    }
}

/// One capture attempt: device plus the resolution and rate to request.
///
/// Immutable for the lifetime of an attempt; fallback produces a new value.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CaptureProfile {
    pub device: DeviceId,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl CaptureProfile {
    pub fn from_video(video: &VideoConfig) -> Self {
        Self {
            device: video.device.clone(),
            width: video.width,
            height: video.height,
            fps: video.fps,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl fmt::Display for CaptureProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{}@{}",
            self.device, self.width, self.height, self.fps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_accepts_path_and_index() {
        #[derive(Deserialize)]
        struct Wrap {
            device: DeviceId,
        }

        let w: Wrap = toml::from_str(r#"device = "/dev/video2""#).unwrap();
        assert_eq!(w.device.to_path(), "/dev/video2");

        let w: Wrap = toml::from_str("device = 3").unwrap();
        assert_eq!(w.device.to_path(), "/dev/video3");
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config: AppConfig = toml::from_str("[video]\nwidth = 640\nheight = 480").unwrap();
        assert_eq!(config.video.width, 640);
        assert_eq!(config.video.fps, 30);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.capture.tool, "ffmpeg");
    }

    #[test]
    fn validate_rejects_zero_fields() {
        let mut video = VideoConfig::default();
        assert!(video.validate().is_ok());

        video.width = 0;
        assert!(video.validate().is_err());

        video.width = 1280;
        video.fps = 0;
        let config = AppConfig {
            video,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn profile_snapshot_matches_video_config() {
        let video = VideoConfig::default();
        let profile = CaptureProfile::from_video(&video);
        assert_eq!(profile.resolution(), (1280, 720));
        assert_eq!(profile.fps, 30);
    }
}
