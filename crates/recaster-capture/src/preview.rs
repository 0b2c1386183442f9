//! Scaled preview of the latest captured frame.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::RgbImage;
use parking_lot::{Mutex, RwLock};

use crate::error::CaptureError;
use crate::frame::{VideoFrame, BYTES_PER_PIXEL};
use crate::CaptureResult;

/// An RGB image sized for the preview area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    pub width: u32,
    pub height: u32,
    /// Packed RGB24 pixels.
    pub rgb: Vec<u8>,
}

/// Largest size with the frame's aspect ratio that fits inside the area.
///
/// Never returns a zero dimension for a non-empty frame and area.
pub fn fit_within(frame_w: u32, frame_h: u32, area_w: u32, area_h: u32) -> (u32, u32) {
    if frame_w == 0 || frame_h == 0 || area_w == 0 || area_h == 0 {
        return (0, 0);
    }

    let scale = f64::min(
        area_w as f64 / frame_w as f64,
        area_h as f64 / frame_h as f64,
    );
    let width = ((frame_w as f64 * scale).round() as u32).clamp(1, area_w);
    let height = ((frame_h as f64 * scale).round() as u32).clamp(1, area_h);
    (width, height)
}

/// Renders frames into a latest-image slot the UI polls.
///
/// Cloning shares the same slot.
#[derive(Debug, Clone, Default)]
pub struct PreviewRenderer {
    area: Arc<Mutex<(u32, u32)>>,
    latest: Arc<RwLock<Option<PreviewImage>>>,
}

impl PreviewRenderer {
    /// Create a renderer for a preview area of the given size.
    pub fn new(area_w: u32, area_h: u32) -> Self {
        Self {
            area: Arc::new(Mutex::new((area_w, area_h))),
            latest: Arc::new(RwLock::new(None)),
        }
    }

    /// Resize the preview area. Takes effect on the next frame.
    pub fn set_area(&self, area_w: u32, area_h: u32) {
        *self.area.lock() = (area_w, area_h);
    }

    /// Scale `frame` into the preview area and store it as the latest image.
    pub fn render(&self, frame: &VideoFrame) -> CaptureResult<()> {
        let (area_w, area_h) = *self.area.lock();
        let (width, height) = fit_within(frame.width, frame.height, area_w, area_h);
        if width == 0 || height == 0 {
            return Ok(());
        }

        let mut rgb = frame.data.to_vec();
        for px in rgb.chunks_exact_mut(BYTES_PER_PIXEL) {
            px.swap(0, 2);
        }
        let source = RgbImage::from_raw(frame.width, frame.height, rgb).ok_or_else(|| {
            CaptureError::FrameConversion(format!(
                "frame buffer does not match {}x{}",
                frame.width, frame.height
            ))
        })?;

        let scaled = if (width, height) == (frame.width, frame.height) {
            source
        } else {
            imageops::resize(&source, width, height, FilterType::Triangle)
        };

        *self.latest.write() = Some(PreviewImage {
            width,
            height,
            rgb: scaled.into_raw(),
        });
        Ok(())
    }

    /// The most recently rendered image.
    pub fn latest(&self) -> Option<PreviewImage> {
        self.latest.read().clone()
    }

    /// Drop the stored image, e.g. when capture is released.
    pub fn clear(&self) {
        *self.latest.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn solid_frame(width: u32, height: u32, bgr: [u8; 3]) -> VideoFrame {
        let data: Vec<u8> = (0..width * height).flat_map(|_| bgr).collect();
        VideoFrame::new(Bytes::from(data), width, height, 1)
    }

    #[test]
    fn test_fit_within_preserves_aspect() {
        assert_eq!(fit_within(1920, 1080, 640, 480), (640, 360));
        assert_eq!(fit_within(1080, 1920, 640, 480), (270, 480));
        assert_eq!(fit_within(200, 150, 400, 300), (400, 300));
        assert_eq!(fit_within(0, 150, 400, 300), (0, 0));
    }

    #[test]
    fn test_render_scales_and_converts() {
        let renderer = PreviewRenderer::new(20, 20);
        renderer.render(&solid_frame(40, 20, [10, 20, 30])).unwrap();

        let image = renderer.latest().unwrap();
        assert_eq!((image.width, image.height), (20, 10));
        assert_eq!(image.rgb.len(), 20 * 10 * 3);
        assert_eq!(&image.rgb[..3], &[30, 20, 10]);
    }

    #[test]
    fn test_clear_and_zero_area() {
        let renderer = PreviewRenderer::new(0, 0);
        renderer.render(&solid_frame(4, 4, [0, 0, 0])).unwrap();
        assert!(renderer.latest().is_none());

        renderer.set_area(4, 4);
        renderer.render(&solid_frame(4, 4, [0, 0, 0])).unwrap();
        assert!(renderer.latest().is_some());

        renderer.clear();
        assert!(renderer.latest().is_none());
    }
}
