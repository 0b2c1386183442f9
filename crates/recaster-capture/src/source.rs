//! Frame source selection.

use recaster_ipc::CaptureMode;
use tracing::{info, instrument};

use crate::error::CaptureError;
use crate::frame::VideoFrame;
use crate::{camera, screen, CaptureResult};

/// Produces the next raw video frame for the video tick.
pub trait FrameGrabber: Send {
    /// Return the newest frame, or `None` if the device has nothing new.
    fn next_frame(&mut self) -> CaptureResult<Option<VideoFrame>>;

    /// Dimensions of every frame this source produces.
    fn dimensions(&self) -> (u32, u32);

    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;
}

/// Opens a frame source for a capture mode.
pub trait FrameSourceOpener: Send + Sync {
    /// Open the backend for `mode`. The variant is chosen here, once per session.
    fn open(&self, mode: &CaptureMode) -> CaptureResult<Box<dyn FrameGrabber>>;
}

/// Opener backed by the platform screen and camera APIs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeOpener;

impl FrameSourceOpener for NativeOpener {
    fn open(&self, mode: &CaptureMode) -> CaptureResult<Box<dyn FrameGrabber>> {
        open_frame_source(mode)
    }
}

/// Open the platform backend for a capture mode.
#[instrument(name = "open_frame_source", skip_all, fields(mode = mode.name()))]
pub fn open_frame_source(mode: &CaptureMode) -> CaptureResult<Box<dyn FrameGrabber>> {
    let grabber = match mode {
        CaptureMode::FullScreen => screen::open_full_screen()?,
        CaptureMode::Region(region) => {
            if region.is_empty() {
                return Err(CaptureError::InvalidRegion(region.size_label()));
            }
            screen::open_region(*region)?
        }
        CaptureMode::Window { title } => {
            let region = screen::find_window_region(title)?;
            info!(title = %title, ?region, "Resolved window rectangle");
            screen::open_region(region)?
        }
        CaptureMode::Camera { index } => camera::open_camera(*index)?,
    };

    Ok(grabber)
}
