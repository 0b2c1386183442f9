//! The video tick.
//!
//! A single thread pulls frames from the frame source, refreshes the
//! preview, and hands each frame to whichever sinks are installed. It is the
//! only code that touches the frame source.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use recaster_capture::{FrameGrabber, PreviewRenderer};
use recaster_encoder::VideoFileWriter;
use tracing::{debug, info, trace, warn};

use crate::error::EngineError;
use crate::metrics::PerformanceMonitor;
use crate::streaming::StreamFeed;
use crate::EngineResult;

/// Nominal tick period.
pub const TICK_INTERVAL: Duration = Duration::from_millis(16);

/// A sink the tick writes into while it is installed.
pub type SinkSlot<T> = Arc<Mutex<Option<T>>>;

/// Sinks fed by the tick. Sessions install and remove them.
#[derive(Default)]
pub struct TickSinks {
    pub recording: SinkSlot<VideoFileWriter>,
    pub streaming: SinkSlot<StreamFeed>,
}

/// Handle to the running tick thread.
pub struct VideoTick {
    should_stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    tick_thread: Option<JoinHandle<()>>,
}

impl VideoTick {
    /// Start ticking. The grabber moves onto the tick thread.
    pub fn start(
        grabber: Box<dyn FrameGrabber>,
        sinks: Arc<TickSinks>,
        preview: PreviewRenderer,
        monitor: Arc<PerformanceMonitor>,
    ) -> EngineResult<Self> {
        let should_stop = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(0));

        let handle = {
            let should_stop = Arc::clone(&should_stop);
            let frames = Arc::clone(&frames);
            thread::Builder::new()
                .name("video-tick".to_string())
                .spawn(move || tick_loop(grabber, sinks, preview, monitor, frames, should_stop))
                .map_err(|e| EngineError::DeviceUnavailable(format!("failed to spawn tick: {e}")))?
        };

        Ok(Self {
            should_stop,
            frames,
            tick_thread: Some(handle),
        })
    }

    /// Frames pulled from the source so far.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Stop the tick and join its thread. The frame source is released.
    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.tick_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for VideoTick {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick_loop(
    mut grabber: Box<dyn FrameGrabber>,
    sinks: Arc<TickSinks>,
    preview: PreviewRenderer,
    monitor: Arc<PerformanceMonitor>,
    frames: Arc<AtomicU64>,
    should_stop: Arc<AtomicBool>,
) {
    info!(source = grabber.name(), "Video tick starting");

    let mut grab_failures: u64 = 0;
    let mut preview_failures: u64 = 0;
    let mut last_log_time = Instant::now();

    while !should_stop.load(Ordering::SeqCst) {
        let tick_start = Instant::now();

        if last_log_time.elapsed() >= Duration::from_secs(5) {
            debug!(frames = frames.load(Ordering::Relaxed), "Tick stats");
            last_log_time = Instant::now();
        }

        match grabber.next_frame() {
            Ok(Some(frame)) => {
                frames.fetch_add(1, Ordering::Relaxed);
                monitor.record_frame();

                if let Err(e) = preview.render(&frame) {
                    preview_failures += 1;
                    if preview_failures == 1 || preview_failures % 100 == 0 {
                        warn!(failures = preview_failures, "Preview render failed: {}", e);
                    }
                }

                // Sink writes only queue; the slot locks are never held across pipe I/O.
                if let Some(writer) = sinks.recording.lock().as_mut() {
                    let (width, height) = writer.dimensions();
                    let frame = frame.cropped(width, height);
                    if let Err(e) = writer.write(frame.data) {
                        trace!("Recording frame dropped: {}", e);
                    }
                }

                if let Some(feed) = sinks.streaming.lock().as_mut() {
                    feed.write_frame(&frame);
                }
            }
            // Device stalled; skip this tick.
            Ok(None) => {}
            Err(e) => {
                grab_failures += 1;
                if grab_failures == 1 || grab_failures % 100 == 0 {
                    warn!(failures = grab_failures, "Frame grab failed: {}", e);
                }
            }
        }

        let elapsed = tick_start.elapsed();
        if elapsed < TICK_INTERVAL {
            thread::sleep(TICK_INTERVAL - elapsed);
        }
    }

    info!(frames = frames.load(Ordering::Relaxed), "Video tick stopped");
}
