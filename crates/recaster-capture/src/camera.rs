//! Camera capture via nokhwa.

use crate::source::FrameGrabber;
use crate::CaptureResult;

/// Highest device index probed when listing cameras.
pub const MAX_CAMERA_PROBE: u32 = 10;

#[cfg(feature = "camera")]
mod native {
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
    use nokhwa::Camera;
    use tracing::{debug, warn};

    use super::*;
    use crate::error::CaptureError;
    use crate::frame::VideoFrame;
    use crate::threaded::{FrameProducer, ThreadedGrabber};
    use crate::CAPTURE_INTERVAL;

    struct CameraProducer {
        index: u32,
        camera: Camera,
        dimensions: (u32, u32),
        sequence: u64,
    }

    impl CameraProducer {
        fn open(index: u32) -> CaptureResult<Self> {
            let mut camera = open_stream(index)?;

            // The first decoded frame fixes the frame size for the session.
            let first = camera
                .frame()
                .and_then(|buffer| buffer.decode_image::<RgbFormat>())
                .map_err(|e| CaptureError::DeviceUnavailable(format!("camera {index}: {e}")))?;
            let dimensions = (first.width(), first.height());

            debug!(index, width = dimensions.0, height = dimensions.1, "Camera opened");
            Ok(Self {
                index,
                camera,
                dimensions,
                sequence: 0,
            })
        }
    }

    impl FrameProducer for CameraProducer {
        fn produce(&mut self) -> CaptureResult<Option<VideoFrame>> {
            let decoded = match self
                .camera
                .frame()
                .and_then(|buffer| buffer.decode_image::<RgbFormat>())
            {
                Ok(image) => image,
                Err(e) => {
                    debug!(index = self.index, "Camera read failed: {}", e);
                    return Ok(None);
                }
            };

            if (decoded.width(), decoded.height()) != self.dimensions {
                warn!(
                    index = self.index,
                    width = decoded.width(),
                    height = decoded.height(),
                    "Camera changed resolution mid-session, dropping frame"
                );
                return Ok(None);
            }

            self.sequence += 1;
            let (width, height) = self.dimensions;
            VideoFrame::from_rgb(&decoded.into_raw(), width, height, self.sequence).map(Some)
        }

        fn dimensions(&self) -> (u32, u32) {
            self.dimensions
        }
    }

    impl Drop for CameraProducer {
        fn drop(&mut self) {
            if let Err(e) = self.camera.stop_stream() {
                warn!(index = self.index, "Failed to stop camera stream: {}", e);
            }
        }
    }

    fn open_stream(index: u32) -> CaptureResult<Camera> {
        let format =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(index), format)
            .map_err(|e| CaptureError::DeviceUnavailable(format!("camera {index}: {e}")))?;
        camera
            .open_stream()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("camera {index}: {e}")))?;
        Ok(camera)
    }

    pub(super) fn open(index: u32) -> CaptureResult<Box<dyn FrameGrabber>> {
        let grabber =
            ThreadedGrabber::spawn("camera", CAPTURE_INTERVAL, move || CameraProducer::open(index))?;
        Ok(Box::new(grabber))
    }

    pub(super) fn probe() -> Vec<u32> {
        (0..MAX_CAMERA_PROBE)
            .filter(|&index| match open_stream(index) {
                Ok(mut camera) => {
                    let _ = camera.stop_stream();
                    true
                }
                Err(_) => false,
            })
            .collect()
    }
}

/// Open a grabber for the camera at `index`.
pub(crate) fn open_camera(index: u32) -> CaptureResult<Box<dyn FrameGrabber>> {
    #[cfg(feature = "camera")]
    {
        native::open(index)
    }
    #[cfg(not(feature = "camera"))]
    {
        Err(crate::error::CaptureError::NotSupported(format!(
            "camera {index} requires the `camera` feature"
        )))
    }
}

/// Indices of cameras that can be opened, probing `0..MAX_CAMERA_PROBE`.
pub fn probe_cameras() -> Vec<u32> {
    #[cfg(feature = "camera")]
    {
        native::probe()
    }
    #[cfg(not(feature = "camera"))]
    {
        Vec::new()
    }
}

#[cfg(all(test, not(feature = "camera")))]
mod tests {
    use super::*;
    use crate::error::CaptureError;

    #[test]
    fn test_camera_unsupported_without_feature() {
        assert!(probe_cameras().is_empty());
        assert!(matches!(open_camera(0), Err(CaptureError::NotSupported(_))));
    }
}
