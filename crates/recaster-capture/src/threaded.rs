//! Backend capture thread shared by the screen and camera sources.
//!
//! Platform handles are opened and used on a dedicated thread, so they never
//! need to be `Send`, and a slow grab never stalls the video tick. The tick
//! side only ever does non-blocking channel reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info, trace, warn};

use crate::error::CaptureError;
use crate::frame::VideoFrame;
use crate::source::FrameGrabber;
use crate::{CaptureResult, FRAME_CHANNEL_CAPACITY};

/// A backend that produces frames on its own thread.
pub(crate) trait FrameProducer {
    /// Grab one frame. `Ok(None)` means the device had nothing this time.
    fn produce(&mut self) -> CaptureResult<Option<VideoFrame>>;

    /// Dimensions of every frame this producer yields.
    fn dimensions(&self) -> (u32, u32);
}

/// Grabber that reads frames handed over by a backend thread.
pub(crate) struct ThreadedGrabber {
    name: &'static str,
    frame_rx: Receiver<VideoFrame>,
    dimensions: (u32, u32),
    should_stop: Arc<AtomicBool>,
    capture_thread: Option<JoinHandle<()>>,
}

impl ThreadedGrabber {
    /// Spawn the backend thread and wait until it has opened its device.
    pub(crate) fn spawn<P, F>(name: &'static str, interval: Duration, open: F) -> CaptureResult<Self>
    where
        P: FrameProducer,
        F: FnOnce() -> CaptureResult<P> + Send + 'static,
    {
        let (frame_tx, frame_rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let should_stop = Arc::new(AtomicBool::new(false));

        let stop = Arc::clone(&should_stop);
        let evict_rx = frame_rx.clone();
        let handle = thread::Builder::new()
            .name(format!("capture-{name}"))
            .spawn(move || {
                let producer = match open() {
                    Ok(producer) => {
                        let _ = ready_tx.send(Ok(producer.dimensions()));
                        producer
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                capture_loop(name, producer, interval, frame_tx, evict_rx, stop);
            })
            .map_err(|e| CaptureError::Backend(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(dimensions)) => {
                info!(source = name, width = dimensions.0, height = dimensions.1, "Capture started");
                Ok(Self {
                    name,
                    frame_rx,
                    dimensions,
                    should_stop,
                    capture_thread: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::ThreadExited)
            }
        }
    }
}

impl FrameGrabber for ThreadedGrabber {
    fn next_frame(&mut self) -> CaptureResult<Option<VideoFrame>> {
        // Keep only the newest frame if the tick fell behind.
        let mut latest = None;
        while let Ok(frame) = self.frame_rx.try_recv() {
            latest = Some(frame);
        }
        Ok(latest)
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for ThreadedGrabber {
    fn drop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
        debug!(source = self.name, "Capture stopped");
    }
}

fn capture_loop<P: FrameProducer>(
    name: &'static str,
    mut producer: P,
    interval: Duration,
    frame_tx: Sender<VideoFrame>,
    evict_rx: Receiver<VideoFrame>,
    should_stop: Arc<AtomicBool>,
) {
    let mut failures: u64 = 0;

    while !should_stop.load(Ordering::SeqCst) {
        let started = Instant::now();

        match producer.produce() {
            Ok(Some(frame)) => {
                let mut frame = frame;
                loop {
                    match frame_tx.try_send(frame) {
                        Ok(()) => break,
                        Err(TrySendError::Full(rejected)) => {
                            let _ = evict_rx.try_recv();
                            frame = rejected;
                        }
                        Err(TrySendError::Disconnected(_)) => return,
                    }
                }
            }
            Ok(None) => trace!(source = name, "No frame available"),
            Err(e) => {
                failures += 1;
                if failures == 1 || failures % 100 == 0 {
                    warn!(source = name, failures, "Frame grab failed: {}", e);
                }
            }
        }

        let elapsed = started.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Counter {
        next: u64,
    }

    impl FrameProducer for Counter {
        fn produce(&mut self) -> CaptureResult<Option<VideoFrame>> {
            self.next += 1;
            let data = Bytes::from(vec![0u8; VideoFrame::bgr_buffer_size(2, 2)]);
            Ok(Some(VideoFrame::new(data, 2, 2, self.next)))
        }

        fn dimensions(&self) -> (u32, u32) {
            (2, 2)
        }
    }

    #[test]
    fn test_threaded_grabber_delivers_latest_frame() {
        let mut grabber =
            ThreadedGrabber::spawn("test", Duration::from_millis(2), || Ok(Counter { next: 0 }))
                .unwrap();
        assert_eq!(grabber.dimensions(), (2, 2));

        thread::sleep(Duration::from_millis(30));
        let first = grabber.next_frame().unwrap().expect("a frame");
        thread::sleep(Duration::from_millis(30));
        let second = grabber.next_frame().unwrap().expect("a frame");
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let result = ThreadedGrabber::spawn("test", Duration::from_millis(2), || {
            Err::<Counter, _>(CaptureError::DeviceUnavailable("camera 9".into()))
        });
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
    }
}
