//! DeckLink device description and capability queries

use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use super::flags::{SupportedVideoModeFlags, VideoConnection, VideoIoSupport};
use super::hal::{DeckLink, DeviceAttributes, DuplexMode};
use super::mode::LinkConfiguration;
use crate::error::{AppError, Capability, Result};

/// Immutable snapshot of a device's identity and capabilities
///
/// Attributes are read once at construction. Only the duplex state and the
/// connection/link selection are read live from the hardware.
#[derive(Clone)]
pub struct DeviceDescriptor {
    device: Arc<dyn DeckLink>,
    name: String,
    attributes: DeviceAttributes,
}

impl DeviceDescriptor {
    /// Read name and attributes from a device handle
    pub fn query(device: Arc<dyn DeckLink>) -> Self {
        let name = device.display_name();
        let attributes = device.attributes();
        debug!(
            "Queried {}: io={:?} inputs={:?} outputs={:?}",
            name, attributes.video_io_support, attributes.input_connections, attributes.output_connections
        );
        Self {
            device,
            name,
            attributes,
        }
    }

    pub fn device(&self) -> &Arc<dyn DeckLink> {
        &self.device
    }

    pub fn persistent_id(&self) -> u64 {
        self.device.persistent_id()
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &DeviceAttributes {
        &self.attributes
    }

    pub fn supports_capture(&self) -> bool {
        self.attributes
            .video_io_support
            .contains(VideoIoSupport::CAPTURE)
    }

    pub fn supports_playback(&self) -> bool {
        self.attributes
            .video_io_support
            .contains(VideoIoSupport::PLAYBACK)
    }

    /// Fail with [`AppError::MissingCapability`] unless the device supports `capability`
    pub fn require(&self, capability: Capability) -> Result<()> {
        let supported = match capability {
            Capability::Capture => self.supports_capture(),
            Capability::Playback => self.supports_playback(),
        };
        if supported {
            Ok(())
        } else {
            Err(AppError::MissingCapability {
                device: self.name.clone(),
                capability,
            })
        }
    }

    pub fn input_connections(&self) -> VideoConnection {
        self.attributes.input_connections
    }

    pub fn output_connections(&self) -> VideoConnection {
        self.attributes.output_connections
    }

    /// Whether any SDI connector (copper or optical) is available for output
    pub fn has_sdi_output(&self) -> bool {
        self.attributes
            .output_connections
            .intersects(VideoConnection::SDI | VideoConnection::OPTICAL_SDI)
    }

    pub fn minimum_preroll_frames(&self) -> u32 {
        self.attributes.minimum_preroll_frames
    }

    /// Whether the current profile gives this sub-device a usable duplex mode
    pub fn is_active(&self) -> bool {
        is_device_active(self.device.as_ref())
    }

    /// Case-sensitive display-name substring match, as used for device selection
    pub fn matches_name(&self, pattern: &str) -> bool {
        self.name.contains(pattern)
    }

    pub fn summary(&self) -> DeviceSummary {
        let attrs = &self.attributes;
        DeviceSummary {
            id: self.persistent_id(),
            name: self.name.clone(),
            active: self.is_active(),
            capture: self.supports_capture(),
            playback: self.supports_playback(),
            input_connections: format!("{:?}", attrs.input_connections),
            output_connections: format!("{:?}", attrs.output_connections),
            format_detection: attrs.supports_input_format_detection,
            colorspace_metadata: attrs.supports_colorspace_metadata,
            hfr_timecode: attrs.supports_hfr_timecode,
            dual_link_sdi: attrs.supports_dual_link_sdi,
            quad_link_sdi: attrs.supports_quad_link_sdi,
            minimum_preroll_frames: attrs.minimum_preroll_frames,
        }
    }
}

impl std::fmt::Debug for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Device information for listing
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub id: u64,
    pub name: String,
    pub active: bool,
    pub capture: bool,
    pub playback: bool,
    pub input_connections: String,
    pub output_connections: String,
    pub format_detection: bool,
    pub colorspace_metadata: bool,
    pub hfr_timecode: bool,
    pub dual_link_sdi: bool,
    pub quad_link_sdi: bool,
    pub minimum_preroll_frames: u32,
}

/// A device is active unless its duplex mode is inactive
pub fn is_device_active(device: &dyn DeckLink) -> bool {
    device.duplex_mode() != DuplexMode::Inactive
}

/// Video-mode support flags for the SDI link configuration in use
///
/// Without an SDI output the default flags apply regardless of `link`.
pub fn sdi_video_mode_flags(has_sdi: bool, link: LinkConfiguration) -> SupportedVideoModeFlags {
    if !has_sdi {
        return SupportedVideoModeFlags::DEFAULT;
    }
    match link {
        LinkConfiguration::SingleLink => SupportedVideoModeFlags::SDI_SINGLE_LINK,
        LinkConfiguration::DualLink => SupportedVideoModeFlags::SDI_DUAL_LINK,
        LinkConfiguration::QuadLink => SupportedVideoModeFlags::SDI_QUAD_LINK,
    }
}
