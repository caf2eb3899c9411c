//! Pixel format definitions and frame buffer layout

use serde::{Deserialize, Serialize};
use std::fmt;

use super::flags::DetectedFormatFlags;

/// Pixel formats understood by the capture and playback hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// Let the hardware decide (mode support queries only)
    Unspecified,
    /// 8-bit 4:2:2 YCbCr, packed as UYVY
    Yuv8,
    /// 10-bit 4:2:2 YCbCr, v210 packing
    Yuv10,
    /// 8-bit ARGB
    Argb8,
    /// 8-bit BGRA
    Bgra8,
    /// 10-bit RGB, r210 packing
    Rgb10,
    /// 12-bit RGB, big-endian packing in 36-byte groups of 8 pixels
    Rgb12,
}

impl PixelFormat {
    /// Bytes per row of a hardware frame buffer for the given width
    ///
    /// These stride rules must match the hardware buffer format exactly.
    /// Returns None for `Unspecified`.
    pub fn bytes_per_row(&self, width: u32) -> Option<usize> {
        let width = width as usize;
        match self {
            PixelFormat::Unspecified => None,
            PixelFormat::Yuv8 => Some(width * 2),
            PixelFormat::Yuv10 => Some(width.div_ceil(48) * 128),
            PixelFormat::Rgb10 => Some(width.div_ceil(64) * 256),
            PixelFormat::Rgb12 => Some(width.div_ceil(8) * 36),
            PixelFormat::Argb8 | PixelFormat::Bgra8 => Some(width * 4),
        }
    }

    /// Total buffer size for a frame of the given dimensions
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        self.bytes_per_row(width).map(|row| row * height as usize)
    }

    /// Derive the capture pixel format from detected signal flags
    ///
    /// RGB 4:4:4 takes precedence over YCbCr 4:2:2. Combinations without a
    /// mapped format yield None, meaning the signal information is
    /// insufficient and no reconfiguration should happen.
    pub fn from_detected_flags(flags: DetectedFormatFlags) -> Option<PixelFormat> {
        if flags.contains(DetectedFormatFlags::RGB_444) {
            if flags.contains(DetectedFormatFlags::BIT_DEPTH_8) {
                Some(PixelFormat::Argb8)
            } else if flags.contains(DetectedFormatFlags::BIT_DEPTH_10) {
                Some(PixelFormat::Rgb10)
            } else if flags.contains(DetectedFormatFlags::BIT_DEPTH_12) {
                Some(PixelFormat::Rgb12)
            } else {
                None
            }
        } else if flags.contains(DetectedFormatFlags::YCBCR_422) {
            if flags.contains(DetectedFormatFlags::BIT_DEPTH_8) {
                Some(PixelFormat::Yuv8)
            } else if flags.contains(DetectedFormatFlags::BIT_DEPTH_10) {
                Some(PixelFormat::Yuv10)
            } else {
                None
            }
        } else {
            None
        }
    }

    /// Check if format is a 4:2:2 YCbCr format
    pub fn is_yuv(&self) -> bool {
        matches!(self, PixelFormat::Yuv8 | PixelFormat::Yuv10)
    }

    /// Get all concrete formats
    pub fn all() -> &'static [PixelFormat] {
        &[
            PixelFormat::Yuv8,
            PixelFormat::Yuv10,
            PixelFormat::Argb8,
            PixelFormat::Bgra8,
            PixelFormat::Rgb10,
            PixelFormat::Rgb12,
        ]
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Unspecified => "UNSPECIFIED",
            PixelFormat::Yuv8 => "YUV8",
            PixelFormat::Yuv10 => "YUV10",
            PixelFormat::Argb8 => "ARGB8",
            PixelFormat::Bgra8 => "BGRA8",
            PixelFormat::Rgb10 => "RGB10",
            PixelFormat::Rgb12 => "RGB12",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "YUV8" | "UYVY" | "2VUY" => Ok(PixelFormat::Yuv8),
            "YUV10" | "V210" => Ok(PixelFormat::Yuv10),
            "ARGB8" | "ARGB" => Ok(PixelFormat::Argb8),
            "BGRA8" | "BGRA" => Ok(PixelFormat::Bgra8),
            "RGB10" | "R210" => Ok(PixelFormat::Rgb10),
            "RGB12" | "R12B" => Ok(PixelFormat::Rgb12),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Colorspaces a display mode may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Colorspace {
    Rec601,
    Rec709,
    Rec2020,
}

impl Colorspace {
    /// Whether the colorspace applies to a display of the given height
    ///
    /// SD (below 720 lines) uses Rec.601, everything else Rec.709.
    pub fn is_supported_for_height(&self, height: u32) -> bool {
        match self {
            Colorspace::Rec601 => height < 720,
            Colorspace::Rec709 => height >= 720,
            Colorspace::Rec2020 => false,
        }
    }
}

impl fmt::Display for Colorspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Colorspace::Rec601 => write!(f, "Rec.601"),
            Colorspace::Rec709 => write!(f, "Rec.709"),
            Colorspace::Rec2020 => write!(f, "Rec.2020"),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}
