//! Hardware driver surface
//!
//! Object-safe traits describing what the DeckLink driver exposes: device
//! handles, input and output interfaces, profile managers and the discovery
//! notifier. Controllers in this crate only talk to hardware through these
//! traits, so a real driver binding and the software emulator in
//! [`super::sim`] are interchangeable.
//!
//! Callbacks registered through these traits are invoked on driver-owned
//! threads. Implementations must not hold internal locks while calling them.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::flags::{
    DetectedFormatFlags, FormatChangedEvents, SupportedVideoModeFlags, VideoConnection,
    VideoInputFlags, VideoIoSupport,
};
use super::format::PixelFormat;
use super::frame::VideoFrame;
use super::mode::{DisplayMode, DisplayModeId, LinkConfiguration};

/// Error reported by a driver call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("operation not supported")]
    NotSupported,

    #[error("device busy")]
    Busy,

    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("device removed")]
    DeviceRemoved,

    #[error("{0}")]
    Failed(String),
}

pub type HwResult<T> = std::result::Result<T, HardwareError>;

/// Static attributes read from a device
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceAttributes {
    pub video_io_support: VideoIoSupport,
    pub input_connections: VideoConnection,
    pub output_connections: VideoConnection,
    pub supports_input_format_detection: bool,
    pub supports_colorspace_metadata: bool,
    pub supports_hfr_timecode: bool,
    pub supports_dual_link_sdi: bool,
    pub supports_quad_link_sdi: bool,
    pub minimum_preroll_frames: u32,
}

/// Duplex state of a sub-device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplexMode {
    Full,
    Half,
    Simplex,
    Inactive,
}

/// A DeckLink sub-device handle
pub trait DeckLink: Send + Sync {
    /// Identifier that stays stable for the lifetime of the device
    fn persistent_id(&self) -> u64;

    fn display_name(&self) -> String;

    fn attributes(&self) -> DeviceAttributes;

    /// Current duplex state, read live from the hardware
    fn duplex_mode(&self) -> DuplexMode;

    fn input(&self) -> Option<Arc<dyn DeckLinkInput>>;

    fn output(&self) -> Option<Arc<dyn DeckLinkOutput>>;

    fn profile_manager(&self) -> Option<Arc<dyn ProfileManager>>;

    fn video_input_connection(&self) -> HwResult<VideoConnection>;

    fn set_video_input_connection(&self, connection: VideoConnection) -> HwResult<()>;

    fn sdi_output_link_configuration(&self) -> HwResult<LinkConfiguration>;

    fn set_sdi_output_link_configuration(&self, link: LinkConfiguration) -> HwResult<()>;
}

impl fmt::Debug for dyn DeckLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeckLink")
            .field("id", &format_args!("{:#x}", self.persistent_id()))
            .field("name", &self.display_name())
            .finish()
    }
}

/// Capture interface of a device
pub trait DeckLinkInput: Send + Sync {
    /// Every display mode the input hardware knows about
    fn display_mode_iterator(&self) -> HwResult<Box<dyn Iterator<Item = DisplayMode> + Send>>;

    fn does_support_video_mode(
        &self,
        connection: VideoConnection,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        flags: SupportedVideoModeFlags,
    ) -> HwResult<bool>;

    fn set_callback(&self, callback: Option<Arc<dyn InputCallback>>) -> HwResult<()>;

    fn set_screen_preview_callback(
        &self,
        callback: Option<Arc<dyn ScreenPreviewCallback>>,
    ) -> HwResult<()>;

    fn enable_video_input(
        &self,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        flags: VideoInputFlags,
    ) -> HwResult<()>;

    fn disable_video_input(&self) -> HwResult<()>;

    fn start_streams(&self) -> HwResult<()>;

    fn stop_streams(&self) -> HwResult<()>;
}

/// Receives capture notifications from the driver
pub trait InputCallback: Send + Sync {
    /// The input signal changed and format detection is enabled
    fn video_input_format_changed(
        &self,
        _events: FormatChangedEvents,
        _mode: &DisplayMode,
        _detected: DetectedFormatFlags,
    ) {
    }

    /// A frame arrived. `None` when only ancillary data (audio) arrived.
    fn video_input_frame_arrived(&self, frame: Option<&VideoFrame>);
}

/// Receives preview frames for on-screen display
pub trait ScreenPreviewCallback: Send + Sync {
    fn draw_frame(&self, frame: &VideoFrame);
}

/// Result of a scheduled frame reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionResult {
    Completed,
    DisplayedLate,
    Dropped,
    Flushed,
}

/// Hardware-allocated output frame buffer
///
/// Ownership moves into the driver on `schedule_video_frame` and comes back
/// through [`VideoOutputCallback::scheduled_frame_completed`].
#[derive(Debug)]
pub struct ScheduledFrame {
    id: u64,
    width: u32,
    height: u32,
    row_bytes: usize,
    pixel_format: PixelFormat,
    display_time: i64,
    data: Vec<u8>,
}

impl ScheduledFrame {
    /// Allocate a zeroed buffer. Called by drivers from `create_video_frame`.
    pub fn new(id: u64, width: u32, height: u32, row_bytes: usize, pixel_format: PixelFormat) -> Self {
        Self {
            id,
            width,
            height,
            row_bytes,
            pixel_format,
            display_time: 0,
            data: vec![0; row_bytes * height as usize],
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Stream time the frame was scheduled at
    pub fn display_time(&self) -> i64 {
        self.display_time
    }

    /// Set by drivers on submission
    pub fn set_display_time(&mut self, display_time: i64) {
        self.display_time = display_time;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Playback interface of a device
pub trait DeckLinkOutput: Send + Sync {
    fn display_mode_iterator(&self) -> HwResult<Box<dyn Iterator<Item = DisplayMode> + Send>>;

    fn display_mode(&self, mode: DisplayModeId) -> HwResult<DisplayMode>;

    fn does_support_video_mode(
        &self,
        connection: VideoConnection,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        flags: SupportedVideoModeFlags,
    ) -> HwResult<bool>;

    fn set_scheduled_frame_completion_callback(
        &self,
        callback: Option<Arc<dyn VideoOutputCallback>>,
    ) -> HwResult<()>;

    fn enable_video_output(&self, mode: DisplayModeId) -> HwResult<()>;

    fn disable_video_output(&self) -> HwResult<()>;

    fn create_video_frame(
        &self,
        width: u32,
        height: u32,
        row_bytes: usize,
        pixel_format: PixelFormat,
    ) -> HwResult<ScheduledFrame>;

    /// Queue a frame. On error the frame is dropped by the driver.
    fn schedule_video_frame(
        &self,
        frame: ScheduledFrame,
        display_time: i64,
        duration: i64,
        time_scale: i64,
    ) -> HwResult<()>;

    fn start_scheduled_playback(&self, start_time: i64, time_scale: i64, speed: f64)
        -> HwResult<()>;

    /// Request a stop. Completion is signalled through
    /// [`VideoOutputCallback::scheduled_playback_has_stopped`].
    fn stop_scheduled_playback(&self, stop_time: i64, time_scale: i64) -> HwResult<()>;
}

/// Receives playback notifications from the driver
pub trait VideoOutputCallback: Send + Sync {
    fn scheduled_frame_completed(&self, frame: ScheduledFrame, result: CompletionResult);

    fn scheduled_playback_has_stopped(&self);
}

/// Identifier of a device profile (duplex/link arrangement of a card)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ProfileId {
    OneSubDeviceFullDuplex,
    OneSubDeviceHalfDuplex,
    TwoSubDevicesFullDuplex,
    TwoSubDevicesHalfDuplex,
    FourSubDevicesHalfDuplex,
}

/// A profile as reported in profile notifications
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProfileInfo {
    pub id: ProfileId,
    pub device_name: String,
    pub is_active: bool,
}

pub trait ProfileManager: Send + Sync {
    fn set_callback(&self, callback: Option<Arc<dyn ProfileNotifications>>) -> HwResult<()>;
}

/// Receives profile change notifications
pub trait ProfileNotifications: Send + Sync {
    fn profile_changing(&self, profile: &ProfileInfo, stream_will_be_forced_to_stop: bool);

    fn profile_activated(&self, profile: &ProfileInfo);
}

/// System-wide device arrival/removal source
pub trait DiscoveryDriver: Send + Sync {
    fn install_device_notifications(
        &self,
        callback: Arc<dyn DeviceNotificationCallback>,
    ) -> HwResult<()>;

    fn uninstall_device_notifications(&self) -> HwResult<()>;
}

pub trait DeviceNotificationCallback: Send + Sync {
    fn device_arrived(&self, device: Arc<dyn DeckLink>);

    fn device_removed(&self, device: Arc<dyn DeckLink>);
}
