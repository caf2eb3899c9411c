//! DeckLink video I/O
//!
//! Device discovery, capture with input-format detection, and scheduled
//! playback, on top of the driver surface in [`hal`]. [`sim`] provides a
//! software-emulated driver.

pub mod bridge;
pub mod capture;
pub mod device;
pub mod discovery;
pub mod flags;
pub mod format;
pub mod frame;
pub mod hal;
pub mod mode;
pub mod output;
pub mod profile;
pub mod sim;

pub use bridge::{FrameBridge, FrameProcessor, Passthrough, RectangleOverlay};
pub use capture::{CaptureCallback, CaptureController, CaptureFormat, CaptureState, CaptureStats};
pub use device::{DeviceDescriptor, DeviceSummary};
pub use discovery::DeviceDiscovery;
pub use format::{Colorspace, PixelFormat, Resolution};
pub use frame::{FrameMeta, VideoFrame};
pub use mode::{DisplayMode, DisplayModeId, LinkConfiguration};
pub use output::{OutputController, PlaybackCallback, PlaybackState, PlaybackStats, ScheduleOutcome};
pub use profile::ProfileCallback;
