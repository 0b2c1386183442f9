//! Full-screen, region, and window capture via xcap.

use recaster_ipc::CaptureRegion;

use crate::source::FrameGrabber;
use crate::CaptureResult;

#[cfg(feature = "screen")]
mod native {
    use tracing::debug;
    use xcap::{Monitor, Window};

    use super::*;
    use crate::error::CaptureError;
    use crate::frame::VideoFrame;
    use crate::threaded::{FrameProducer, ThreadedGrabber};
    use crate::CAPTURE_INTERVAL;

    /// Grabs the primary display, optionally cropped to a rectangle.
    struct ScreenProducer {
        monitor: Monitor,
        origin: (u32, u32),
        size: (u32, u32),
        sequence: u64,
    }

    impl ScreenProducer {
        fn open(region: Option<CaptureRegion>) -> CaptureResult<Self> {
            let monitor = primary_monitor()?;
            let probe = monitor
                .capture_image()
                .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;
            let (screen_w, screen_h) = (probe.width(), probe.height());

            let (origin, size) = match region {
                None => ((0, 0), (screen_w, screen_h)),
                Some(region) => {
                    let x = region.left - monitor.x();
                    let y = region.top - monitor.y();
                    let fits = x >= 0
                        && y >= 0
                        && x as u32 + region.width <= screen_w
                        && y as u32 + region.height <= screen_h;
                    if !fits {
                        return Err(CaptureError::InvalidRegion(format!(
                            "{} at ({}, {}) is outside the {screen_w}x{screen_h} display",
                            region.size_label(),
                            region.left,
                            region.top
                        )));
                    }
                    ((x as u32, y as u32), (region.width, region.height))
                }
            };

            debug!(monitor = monitor.name(), ?origin, ?size, "Screen producer opened");
            Ok(Self {
                monitor,
                origin,
                size,
                sequence: 0,
            })
        }
    }

    impl FrameProducer for ScreenProducer {
        fn produce(&mut self) -> CaptureResult<Option<VideoFrame>> {
            let image = self
                .monitor
                .capture_image()
                .map_err(|e| CaptureError::Backend(e.to_string()))?;
            self.sequence += 1;
            let frame = VideoFrame::from_rgba_region(
                image.as_raw(),
                image.width(),
                self.origin.0,
                self.origin.1,
                self.size.0,
                self.size.1,
                self.sequence,
            )?;
            Ok(Some(frame))
        }

        fn dimensions(&self) -> (u32, u32) {
            self.size
        }
    }

    fn primary_monitor() -> CaptureResult<Monitor> {
        let monitors = Monitor::all().map_err(|e| CaptureError::Backend(e.to_string()))?;
        let index = monitors.iter().position(|m| m.is_primary()).unwrap_or(0);
        monitors
            .into_iter()
            .nth(index)
            .ok_or_else(|| CaptureError::SourceNotFound("no display attached".to_string()))
    }

    pub(super) fn open(region: Option<CaptureRegion>) -> CaptureResult<Box<dyn FrameGrabber>> {
        let name = if region.is_some() { "region" } else { "screen" };
        let grabber = ThreadedGrabber::spawn(name, CAPTURE_INTERVAL, move || {
            ScreenProducer::open(region)
        })?;
        Ok(Box::new(grabber))
    }

    pub(super) fn window_region(title: &str) -> CaptureResult<CaptureRegion> {
        let windows = Window::all().map_err(|e| CaptureError::Backend(e.to_string()))?;
        let window = windows
            .iter()
            .find(|w| w.title() == title)
            .ok_or_else(|| CaptureError::SourceNotFound(format!("window '{title}'")))?;

        if window.is_minimized() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "window '{title}' is minimized"
            )));
        }

        let left = window.x();
        let top = window.y();
        Ok(CaptureRegion::from_window_rect(
            left,
            top,
            left + window.width() as i32,
            top + window.height() as i32,
        ))
    }
}

/// Open a grabber for the whole primary display.
pub(crate) fn open_full_screen() -> CaptureResult<Box<dyn FrameGrabber>> {
    #[cfg(feature = "screen")]
    {
        native::open(None)
    }
    #[cfg(not(feature = "screen"))]
    {
        Err(not_supported())
    }
}

/// Open a grabber for a fixed screen rectangle.
pub(crate) fn open_region(region: CaptureRegion) -> CaptureResult<Box<dyn FrameGrabber>> {
    #[cfg(feature = "screen")]
    {
        native::open(Some(region))
    }
    #[cfg(not(feature = "screen"))]
    {
        let _ = region;
        Err(not_supported())
    }
}

/// Look up a window by exact title and return its screen rectangle.
pub fn find_window_region(title: &str) -> CaptureResult<CaptureRegion> {
    #[cfg(feature = "screen")]
    {
        native::window_region(title)
    }
    #[cfg(not(feature = "screen"))]
    {
        let _ = title;
        Err(not_supported())
    }
}

#[cfg(not(feature = "screen"))]
fn not_supported() -> crate::error::CaptureError {
    crate::error::CaptureError::NotSupported(
        "screen capture requires the `screen` feature".to_string(),
    )
}
