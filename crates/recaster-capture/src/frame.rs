//! Captured frame types.

use std::time::Instant;

use bytes::Bytes;

use crate::error::CaptureError;
use crate::CaptureResult;

/// Bytes per pixel in the canonical BGR layout.
pub const BYTES_PER_PIXEL: usize = 3;

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// BGR24 pixel data, row-major, no padding.
    pub data: Bytes,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Monotonic timestamp when the frame was captured.
    pub captured_at: Instant,

    /// Monotonically increasing sequence number.
    pub sequence: u64,
}

impl VideoFrame {
    /// Create a new frame from BGR data.
    pub fn new(data: Bytes, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
            sequence,
        }
    }

    /// Calculate the BGR buffer size for given dimensions.
    pub fn bgr_buffer_size(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// Validate that the frame data matches its dimensions.
    pub fn is_valid(&self) -> bool {
        self.data.len() == Self::bgr_buffer_size(self.width, self.height)
    }

    /// Convert a rectangle of an RGBA image into a BGR frame.
    ///
    /// `stride_width` is the width of the source image in pixels.
    pub fn from_rgba_region(
        rgba: &[u8],
        stride_width: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        sequence: u64,
    ) -> CaptureResult<Self> {
        let stride = stride_width as usize * 4;
        let rows = if stride == 0 { 0 } else { rgba.len() / stride };
        if x + width > stride_width || y as usize + height as usize > rows {
            return Err(CaptureError::FrameConversion(format!(
                "region {width}x{height}+{x}+{y} exceeds {stride_width}x{rows} source"
            )));
        }

        let mut bgr = Vec::with_capacity(Self::bgr_buffer_size(width, height));
        for row in y as usize..(y + height) as usize {
            let start = row * stride + x as usize * 4;
            let end = start + width as usize * 4;
            for px in rgba[start..end].chunks_exact(4) {
                bgr.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        }

        Ok(Self::new(Bytes::from(bgr), width, height, sequence))
    }

    /// Convert a packed RGB buffer into a BGR frame.
    pub fn from_rgb(rgb: &[u8], width: u32, height: u32, sequence: u64) -> CaptureResult<Self> {
        if rgb.len() != Self::bgr_buffer_size(width, height) {
            return Err(CaptureError::FrameConversion(format!(
                "expected {} bytes for {width}x{height}, got {}",
                Self::bgr_buffer_size(width, height),
                rgb.len()
            )));
        }

        let mut bgr = rgb.to_vec();
        for px in bgr.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.swap(0, 2);
        }

        Ok(Self::new(Bytes::from(bgr), width, height, sequence))
    }

    /// Top-left crop to the given dimensions.
    ///
    /// Returns a cheap clone when the size already matches. Dimensions larger
    /// than the frame are clamped to the frame.
    pub fn cropped(&self, width: u32, height: u32) -> VideoFrame {
        let width = width.min(self.width);
        let height = height.min(self.height);
        if width == self.width && height == self.height {
            return self.clone();
        }

        let src_stride = self.width as usize * BYTES_PER_PIXEL;
        let row_len = width as usize * BYTES_PER_PIXEL;
        let mut data = Vec::with_capacity(Self::bgr_buffer_size(width, height));
        for row in 0..height as usize {
            let start = row * src_stride;
            data.extend_from_slice(&self.data[start..start + row_len]);
        }

        VideoFrame {
            data: Bytes::from(data),
            width,
            height,
            captured_at: self.captured_at,
            sequence: self.sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> VideoFrame {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 7]);
            }
        }
        VideoFrame::new(Bytes::from(data), width, height, 0)
    }

    #[test]
    fn test_cropped_to_even() {
        let frame = gradient(5, 3);
        let cropped = frame.cropped(4, 2);

        assert_eq!((cropped.width, cropped.height), (4, 2));
        assert!(cropped.is_valid());
        // Second row starts with pixel (0, 1).
        assert_eq!(&cropped.data[12..15], &[0, 1, 7]);
    }

    #[test]
    fn test_cropped_same_size_is_identity() {
        let frame = gradient(4, 2);
        let cropped = frame.cropped(4, 2);
        assert_eq!(cropped.data, frame.data);
    }

    #[test]
    fn test_from_rgba_region_swaps_channels() {
        // 2x2 RGBA image, pick the bottom-right pixel.
        let rgba = [
            1, 2, 3, 255, 4, 5, 6, 255, //
            7, 8, 9, 255, 10, 11, 12, 255,
        ];
        let frame = VideoFrame::from_rgba_region(&rgba, 2, 1, 1, 1, 1, 0).unwrap();
        assert_eq!(&frame.data[..], &[12, 11, 10]);
    }

    #[test]
    fn test_from_rgba_region_out_of_bounds() {
        let rgba = [0u8; 16];
        assert!(VideoFrame::from_rgba_region(&rgba, 2, 1, 0, 2, 2, 0).is_err());
    }

    #[test]
    fn test_from_rgb_rejects_short_buffer() {
        assert!(VideoFrame::from_rgb(&[0u8; 5], 1, 2, 0).is_err());
        let frame = VideoFrame::from_rgb(&[1, 2, 3], 1, 1, 0).unwrap();
        assert_eq!(&frame.data[..], &[3, 2, 1]);
    }
}
