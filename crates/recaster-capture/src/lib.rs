//! Screen, region, and camera frame capture.
//!
//! Frames are produced by a backend chosen once per session from the
//! [`CaptureMode`]. Screen capture uses xcap (feature `screen`), camera
//! capture uses nokhwa (feature `camera`). Without those features the
//! corresponding modes report [`CaptureError::NotSupported`].

mod camera;
mod error;
mod frame;
mod preview;
mod region;
mod screen;
mod source;
#[cfg_attr(not(any(feature = "screen", feature = "camera")), allow(dead_code))]
mod threaded;

pub use camera::{probe_cameras, MAX_CAMERA_PROBE};
pub use error::CaptureError;
pub use frame::{VideoFrame, BYTES_PER_PIXEL};
pub use preview::{fit_within, PreviewImage, PreviewRenderer};
pub use region::{RegionSelection, CONFIRM_DELAY};
pub use screen::find_window_region;
pub use source::{open_frame_source, FrameGrabber, FrameSourceOpener, NativeOpener};

pub use recaster_ipc::{CaptureMode, CaptureRegion};

use std::time::Duration;

/// Channel capacity between a backend thread and its grabber.
pub const FRAME_CHANNEL_CAPACITY: usize = 2;

/// Pacing of backend capture threads (one frame per output frame interval).
pub const CAPTURE_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 30);

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
