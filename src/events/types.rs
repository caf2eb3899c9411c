//! Event types
//!
//! Defines all event types that can be broadcast through the event bus.

use serde::Serialize;
use std::sync::Arc;

use crate::video::format::PixelFormat;
use crate::video::frame::FrameMeta;
use crate::video::hal::{CompletionResult, DeckLink, ProfileInfo};
use crate::video::mode::DisplayMode;

/// Lightweight reference to a device, used to label events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRef {
    /// Persistent hardware identifier
    pub id: u64,
    /// Display name (e.g. "DeckLink Duo (2)")
    pub name: String,
}

impl DeviceRef {
    pub fn of(device: &dyn DeckLink) -> Self {
        Self {
            id: device.persistent_id(),
            name: device.display_name(),
        }
    }
}

/// Profile change relayed from a device's profile manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileChangeNotice {
    pub profile: ProfileInfo,
    /// Running streams on the card will be stopped by the driver
    pub stream_will_be_forced_to_stop: bool,
}

/// DeckLink event enumeration
///
/// Serialized as
/// ```json
/// { "event": "capture.format_changed", "data": { ... } }
/// ```
/// Device handles are carried alongside for in-process subscribers and are
/// not serialized.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum DeckLinkEvent {
    /// A device became available
    #[serde(rename = "device.arrived")]
    DeviceArrived {
        device: DeviceRef,
        #[serde(skip)]
        handle: Arc<dyn DeckLink>,
    },

    /// A device was removed; its handle is no longer live
    #[serde(rename = "device.removed")]
    DeviceRemoved { device: DeviceRef },

    /// A frame was captured
    #[serde(rename = "capture.frame_arrived")]
    VideoFrameArrived { device: DeviceRef, frame: FrameMeta },

    /// Capture was reconfigured to follow the detected input signal
    #[serde(rename = "capture.format_changed")]
    InputFormatChanged {
        device: DeviceRef,
        display_mode: DisplayMode,
        pixel_format: PixelFormat,
        dual_stream_3d: bool,
    },

    /// Reconfiguring to a detected format failed; capture on the device
    /// has stopped
    #[serde(rename = "capture.format_change_failed")]
    InputFormatChangeFailed {
        device: DeviceRef,
        display_mode: DisplayMode,
        pixel_format: PixelFormat,
        error: String,
    },

    /// The hardware finished with a scheduled frame
    #[serde(rename = "playback.frame_completed")]
    ScheduledFrameCompleted {
        device: DeviceRef,
        frame_id: u64,
        /// Stream time the frame was scheduled at
        stream_time: i64,
        result: CompletionResult,
    },

    /// A profile change that stops running streams is about to happen
    #[serde(rename = "profile.changing")]
    ProfileChanging(ProfileChangeNotice),

    /// A profile was activated
    #[serde(rename = "profile.activated")]
    ProfileActivated { profile: ProfileInfo },
}

impl DeckLinkEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::DeviceArrived { .. } => "device.arrived",
            Self::DeviceRemoved { .. } => "device.removed",
            Self::VideoFrameArrived { .. } => "capture.frame_arrived",
            Self::InputFormatChanged { .. } => "capture.format_changed",
            Self::InputFormatChangeFailed { .. } => "capture.format_change_failed",
            Self::ScheduledFrameCompleted { .. } => "playback.frame_completed",
            Self::ProfileChanging(_) => "profile.changing",
            Self::ProfileActivated { .. } => "profile.activated",
        }
    }

    /// Check if event name matches a topic pattern
    ///
    /// Supports wildcards:
    /// - `*` matches all events
    /// - `capture.*` matches all capture events
    /// - `device.arrived` matches exact event
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();

        if topic.ends_with(".*") {
            let prefix = topic.trim_end_matches(".*");
            event_name.starts_with(prefix)
        } else {
            event_name == topic
        }
    }
}
