//! Frame bridge between capture and playback
//!
//! An arrived frame only lives for the duration of the capture callback, so
//! the bridge first copies it into an owned, tightly packed buffer and then
//! runs the configured [`FrameProcessor`] over the copy.

use tracing::debug;

use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use crate::error::{AppError, Result};

/// Mutable view of a packed frame buffer handed to processors
pub struct FrameView<'a> {
    pub data: &'a mut [u8],
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub format: PixelFormat,
}

/// Per-frame processing stage
pub trait FrameProcessor: Send {
    fn name(&self) -> &'static str;

    fn process(&mut self, frame: &mut FrameView<'_>);
}

/// Leaves frames untouched
pub struct Passthrough;

impl FrameProcessor for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn process(&mut self, _frame: &mut FrameView<'_>) {}
}

/// Green bracket centered in the frame: left, right and bottom edges
#[derive(Debug, Clone)]
pub struct RectangleOverlay {
    pub width: u32,
    pub height: u32,
    pub thickness: u32,
    warned: bool,
}

impl Default for RectangleOverlay {
    fn default() -> Self {
        Self::new(400, 250, 2)
    }
}

impl RectangleOverlay {
    pub fn new(width: u32, height: u32, thickness: u32) -> Self {
        Self {
            width,
            height,
            thickness: thickness.max(1),
            warned: false,
        }
    }

    /// Fill the clipped rectangle `[x0, x1) x [y0, y1)` with green
    fn fill(frame: &mut FrameView<'_>, x0: u32, x1: u32, y0: u32, y1: u32) {
        // A trailing odd column has no complete UYVY pair to write into
        let width = match frame.format {
            PixelFormat::Yuv8 => frame.width & !1,
            _ => frame.width,
        };
        let x1 = x1.min(width);
        let y1 = y1.min(frame.height);
        for y in y0..y1 {
            let row = y as usize * frame.stride;
            for x in x0..x1 {
                paint_green(frame.data, row, x as usize, frame.format);
            }
        }
    }
}

impl FrameProcessor for RectangleOverlay {
    fn name(&self) -> &'static str {
        "rectangle"
    }

    fn process(&mut self, frame: &mut FrameView<'_>) {
        if !matches!(
            frame.format,
            PixelFormat::Yuv8 | PixelFormat::Argb8 | PixelFormat::Bgra8
        ) {
            if !self.warned {
                debug!("Rectangle overlay skips {} frames", frame.format);
                self.warned = true;
            }
            return;
        }

        let (cx, cy) = (frame.width / 2, frame.height / 2);
        let left = cx.saturating_sub(self.width / 2);
        let right = cx + self.width / 2;
        let top = cy.saturating_sub(self.height / 2);
        let bottom = cy + self.height / 2;

        // Lines are centered on the edge coordinate
        let t = self.thickness;
        let half = t / 2;
        let span = |edge: u32| (edge.saturating_sub(half), edge.saturating_sub(half) + t);

        let (lx0, lx1) = span(left);
        let (rx0, rx1) = span(right);
        let (by0, by1) = span(bottom);

        Self::fill(frame, lx0, lx1, top, bottom + 1);
        Self::fill(frame, rx0, rx1, top, bottom + 1);
        Self::fill(frame, left, right + 1, by0, by1);
    }
}

/// Write one green pixel at column `x` of the row starting at `row`
fn paint_green(data: &mut [u8], row: usize, x: usize, format: PixelFormat) {
    match format {
        // UYVY pairs share chroma; BT.709 limited-range green
        PixelFormat::Yuv8 => {
            let pair = row + (x / 2) * 4;
            data[pair] = 42;
            data[pair + 2] = 26;
            data[pair + 1 + (x % 2) * 2] = 173;
        }
        PixelFormat::Argb8 => {
            let px = row + x * 4;
            data[px..px + 4].copy_from_slice(&[0xFF, 0x00, 0xFF, 0x00]);
        }
        PixelFormat::Bgra8 => {
            let px = row + x * 4;
            data[px..px + 4].copy_from_slice(&[0x00, 0xFF, 0x00, 0xFF]);
        }
        _ => {}
    }
}

/// Copy-out and processing stage between the two controllers
pub struct FrameBridge {
    processor: Box<dyn FrameProcessor>,
}

impl FrameBridge {
    pub fn new(processor: Box<dyn FrameProcessor>) -> Self {
        Self { processor }
    }

    pub fn passthrough() -> Self {
        Self::new(Box::new(Passthrough))
    }

    pub fn processor_name(&self) -> &'static str {
        self.processor.name()
    }

    /// Copy a borrowed frame buffer into an owned, packed frame
    ///
    /// Row padding in the source is dropped, so the result's stride is the
    /// format's bytes per row.
    pub fn copy_frame(
        data: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        sequence: u64,
    ) -> Result<VideoFrame> {
        let (packed, row_bytes) = pack_rows(data, width, height, stride, format)?;
        Ok(VideoFrame::from_vec(
            packed,
            Resolution::new(width, height),
            format,
            row_bytes as u32,
            sequence,
        ))
    }

    /// Copy `frame` out and run the processor over the copy
    pub fn process(&mut self, frame: &VideoFrame) -> Result<VideoFrame> {
        let (mut data, row_bytes) = pack_rows(
            frame.data(),
            frame.width(),
            frame.height(),
            frame.stride as usize,
            frame.format,
        )?;

        self.processor.process(&mut FrameView {
            data: &mut data,
            width: frame.width(),
            height: frame.height(),
            stride: row_bytes,
            format: frame.format,
        });

        Ok(
            VideoFrame::from_vec(data, frame.resolution, frame.format, row_bytes as u32, frame.sequence)
                .with_flags(frame.flags),
        )
    }
}

fn pack_rows(
    data: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
) -> Result<(Vec<u8>, usize)> {
    let row_bytes = format
        .bytes_per_row(width)
        .ok_or_else(|| AppError::InvalidArgument(format!("no stride for {}", format)))?;
    if height == 0 || stride < row_bytes || data.len() < stride * (height as usize - 1) + row_bytes {
        return Err(AppError::FrameMismatch(format!(
            "{} bytes at stride {} cannot hold {}x{} {}",
            data.len(),
            stride,
            width,
            height,
            format
        )));
    }

    let mut packed = Vec::with_capacity(row_bytes * height as usize);
    for row in data.chunks(stride).take(height as usize) {
        packed.extend_from_slice(&row[..row_bytes]);
    }
    Ok((packed, row_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::flags::FrameFlags;

    fn uyvy(width: u32, height: u32, stride: usize) -> VideoFrame {
        VideoFrame::from_vec(
            vec![0x10; stride * height as usize],
            Resolution::new(width, height),
            PixelFormat::Yuv8,
            stride as u32,
            9,
        )
    }

    fn pixel_is_green_uyvy(frame: &VideoFrame, x: usize, y: usize) -> bool {
        let row = y * frame.stride as usize;
        let pair = row + (x / 2) * 4;
        let d = frame.data();
        d[pair] == 42 && d[pair + 2] == 26 && d[pair + 1 + (x % 2) * 2] == 173
    }

    #[test]
    fn test_copy_frame_drops_padding() {
        let stride = 16;
        let mut data = vec![0xAA; stride * 3];
        for y in 0..3 {
            data[y * stride..y * stride + 8].fill(y as u8);
        }

        let frame = FrameBridge::copy_frame(&data, 4, 3, stride, PixelFormat::Yuv8, 5).unwrap();

        assert_eq!(frame.stride, 8);
        assert_eq!(frame.len(), 24);
        assert_eq!(frame.data()[..8], [0; 8]);
        assert_eq!(frame.data()[16..], [2; 8]);
        assert_eq!(frame.sequence, 5);
    }

    #[test]
    fn test_copy_frame_rejects_short_buffers() {
        assert!(matches!(
            FrameBridge::copy_frame(&[0; 10], 4, 3, 8, PixelFormat::Yuv8, 0),
            Err(AppError::FrameMismatch(_))
        ));
        assert!(matches!(
            FrameBridge::copy_frame(&[0; 64], 4, 2, 4, PixelFormat::Yuv8, 0),
            Err(AppError::FrameMismatch(_))
        ));
        assert!(matches!(
            FrameBridge::copy_frame(&[0; 64], 4, 2, 8, PixelFormat::Unspecified, 0),
            Err(AppError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_passthrough_copies_and_keeps_flags() {
        let source = uyvy(8, 4, 16).with_flags(FrameFlags::HAS_NO_INPUT_SOURCE);
        let mut bridge = FrameBridge::passthrough();

        let out = bridge.process(&source).unwrap();

        assert_eq!(bridge.processor_name(), "passthrough");
        assert_eq!(out.resolution, source.resolution);
        assert_eq!(out.stride, 16);
        assert_eq!(out.data(), source.data());
        assert_ne!(out.data().as_ptr(), source.data().as_ptr());
        assert!(!out.has_input_source());
    }

    #[test]
    fn test_overlay_on_uyvy() {
        let source = uyvy(720, 576, 1440);
        let mut bridge = FrameBridge::new(Box::new(RectangleOverlay::default()));

        let out = bridge.process(&source).unwrap();

        // Left edge at x=160, right at x=560, bottom at y=413, top at y=163
        assert!(pixel_is_green_uyvy(&out, 160, 288));
        assert!(pixel_is_green_uyvy(&out, 560, 288));
        assert!(pixel_is_green_uyvy(&out, 360, 413));
        assert!(!pixel_is_green_uyvy(&out, 360, 163));
        assert!(!pixel_is_green_uyvy(&out, 360, 288));
        assert_eq!(out.data()[0], 0x10);
        // Source is untouched
        assert!(source.data().iter().all(|b| *b == 0x10));
    }

    #[test]
    fn test_overlay_on_rgb_formats() {
        for (format, green) in [
            (PixelFormat::Argb8, [0xFF, 0x00, 0xFF, 0x00]),
            (PixelFormat::Bgra8, [0x00, 0xFF, 0x00, 0xFF]),
        ] {
            let frame = VideoFrame::from_vec(
                vec![0; 64 * 4 * 48],
                Resolution::new(64, 48),
                format,
                256,
                1,
            );
            let mut bridge = FrameBridge::new(Box::new(RectangleOverlay::new(20, 10, 1)));

            let out = bridge.process(&frame).unwrap();

            // Left edge of a 20x10 box centered at (32, 24)
            let px = 24 * 256 + 22 * 4;
            assert_eq!(out.data()[px..px + 4], green, "{}", format);
        }
    }

    #[test]
    fn test_overlay_clips_to_small_frames() {
        let source = uyvy(16, 8, 32);
        let mut bridge = FrameBridge::new(Box::new(RectangleOverlay::default()));

        let out = bridge.process(&source).unwrap();

        assert_eq!(out.len(), source.len());
    }

    #[test]
    fn test_overlay_on_odd_width_uyvy() {
        let stride = PixelFormat::Yuv8.bytes_per_row(721).unwrap();
        let source = uyvy(721, 4, stride);
        let mut bridge = FrameBridge::new(Box::new(RectangleOverlay::new(2000, 2, 2)));

        let out = bridge.process(&source).unwrap();

        // The bottom edge spans the frame up to the last complete pair
        assert!(pixel_is_green_uyvy(&out, 0, 3));
        assert!(pixel_is_green_uyvy(&out, 719, 3));
        assert_eq!(out.data()[4 * stride - 2..], [0x10, 0x10]);
        assert_eq!(out.len(), source.len());
    }

    #[test]
    fn test_overlay_skips_packed_10bit() {
        let row = PixelFormat::Yuv10.bytes_per_row(96).unwrap();
        let source = VideoFrame::from_vec(
            vec![7; row * 20],
            Resolution::new(96, 20),
            PixelFormat::Yuv10,
            row as u32,
            1,
        );
        let mut bridge = FrameBridge::new(Box::new(RectangleOverlay::new(10, 10, 2)));

        let out = bridge.process(&source).unwrap();

        assert_eq!(out.data(), source.data());
    }
}
