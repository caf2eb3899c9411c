use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::video::flags::VideoConnection;
use crate::video::format::PixelFormat;
use crate::video::mode::{DisplayModeId, LinkConfiguration};
use crate::video::sim::FramePacing;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture side
    pub input: InputConfig,
    /// Playback side
    pub output: OutputConfig,
    /// Rectangle drawn on every frame between capture and playback
    pub overlay: OverlayConfig,
    /// Emulated devices
    pub sim: SimConfig,
}

impl AppConfig {
    /// Reject values no controller could work with
    pub fn validate(&self) -> Result<()> {
        if self.input.device_match.trim().is_empty() {
            return Err(AppError::Config("input.device_match is empty".to_string()));
        }
        if self.output.device_match.trim().is_empty() {
            return Err(AppError::Config("output.device_match is empty".to_string()));
        }
        if self.output.pixel_format == PixelFormat::Unspecified {
            return Err(AppError::Config(
                "output.pixel_format must name a concrete format".to_string(),
            ));
        }
        if self.overlay.enabled && self.overlay.thickness == 0 {
            return Err(AppError::Config("overlay.thickness must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Substring of the capture device's display name
    pub device_match: String,
    /// Mode to start capturing in
    pub display_mode: DisplayModeId,
    /// Follow the detected signal format when it changes
    pub apply_detected_format: bool,
    /// Input connector; keep the device's current one when unset
    pub connection: Option<InputConnection>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            device_match: "DeckLink Duo (2)".to_string(),
            display_mode: DisplayModeId::Hd1080p5994,
            apply_detected_format: false,
            connection: None,
        }
    }
}

/// Playback configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Substring of the playback device's display name
    pub device_match: String,
    /// Mode to play out in
    pub display_mode: DisplayModeId,
    /// Pixel format of scheduled frames
    pub pixel_format: PixelFormat,
    /// SDI link configuration applied before playback
    pub link_configuration: Option<LinkConfiguration>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device_match: "DeckLink Duo (4)".to_string(),
            display_mode: DisplayModeId::Hd1080p5994,
            pixel_format: PixelFormat::Yuv8,
            link_configuration: None,
        }
    }
}

/// Overlay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub thickness: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 400,
            height: 250,
            thickness: 2,
        }
    }
}

/// Physical input connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputConnection {
    Sdi,
    Hdmi,
    OpticalSdi,
    Component,
    Composite,
    Svideo,
}

impl InputConnection {
    pub fn to_video_connection(self) -> VideoConnection {
        match self {
            InputConnection::Sdi => VideoConnection::SDI,
            InputConnection::Hdmi => VideoConnection::HDMI,
            InputConnection::OpticalSdi => VideoConnection::OPTICAL_SDI,
            InputConnection::Component => VideoConnection::COMPONENT,
            InputConnection::Composite => VideoConnection::COMPOSITE,
            InputConnection::Svideo => VideoConnection::SVIDEO,
        }
    }
}

/// What an emulated device can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimDeviceKind {
    #[default]
    Duplex,
    Input,
    Output,
}

/// One emulated sub-device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimDeviceEntry {
    pub name: String,
    pub kind: SimDeviceKind,
    pub minimum_preroll_frames: u32,
    pub quad_link: bool,
}

impl Default for SimDeviceEntry {
    fn default() -> Self {
        Self {
            name: "DeckLink Duo (1)".to_string(),
            kind: SimDeviceKind::Duplex,
            minimum_preroll_frames: 0,
            quad_link: false,
        }
    }
}

/// Emulated driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub devices: Vec<SimDeviceEntry>,
    pub pacing: FramePacing,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            devices: vec![
                SimDeviceEntry {
                    name: "DeckLink Duo (2)".to_string(),
                    kind: SimDeviceKind::Input,
                    ..Default::default()
                },
                SimDeviceEntry {
                    name: "DeckLink Duo (4)".to_string(),
                    kind: SimDeviceKind::Output,
                    minimum_preroll_frames: 3,
                    ..Default::default()
                },
            ],
            pacing: FramePacing::Realtime,
        }
    }
}
