//! Video frame data structures

use bytes::Bytes;
use serde::Serialize;
use std::time::Instant;

use super::flags::FrameFlags;
use super::format::{PixelFormat, Resolution};

/// A captured or processed video frame with metadata
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Raw frame data, `stride * height` bytes
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Stride (bytes per line)
    pub stride: u32,
    /// Flags reported by the hardware
    pub flags: FrameFlags,
    /// Frame sequence number
    pub sequence: u64,
    /// Timestamp when frame was captured
    pub capture_ts: Instant,
}

impl VideoFrame {
    /// Create a new video frame
    pub fn new(
        data: Bytes,
        resolution: Resolution,
        format: PixelFormat,
        stride: u32,
        sequence: u64,
    ) -> Self {
        Self {
            data,
            resolution,
            format,
            stride,
            flags: FrameFlags::DEFAULT,
            sequence,
            capture_ts: Instant::now(),
        }
    }

    /// Create a frame from a Vec<u8>
    pub fn from_vec(
        data: Vec<u8>,
        resolution: Resolution,
        format: PixelFormat,
        stride: u32,
        sequence: u64,
    ) -> Self {
        Self::new(Bytes::from(data), resolution, format, stride, sequence)
    }

    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get frame data as Bytes (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Get data length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if frame is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get width
    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    /// Get height
    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// One row of pixel data, without stride padding beyond `len`
    pub fn row(&self, y: u32, len: usize) -> Option<&[u8]> {
        let start = y as usize * self.stride as usize;
        self.data.get(start..start + len)
    }

    /// Whether the hardware saw a signal on the input
    pub fn has_input_source(&self) -> bool {
        !self.flags.contains(FrameFlags::HAS_NO_INPUT_SOURCE)
    }

    /// Get age of this frame (time since capture)
    pub fn age(&self) -> std::time::Duration {
        self.capture_ts.elapsed()
    }
}

/// Frame metadata without actual data (for events/stats)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameMeta {
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub stride: u32,
    pub size: usize,
    pub sequence: u64,
    pub has_input_source: bool,
}

impl From<&VideoFrame> for FrameMeta {
    fn from(frame: &VideoFrame) -> Self {
        Self {
            resolution: frame.resolution,
            format: frame.format,
            stride: frame.stride,
            size: frame.len(),
            sequence: frame.sequence,
            has_input_source: frame.has_input_source(),
        }
    }
}
