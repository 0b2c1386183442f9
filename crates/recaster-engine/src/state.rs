//! Shared capture resources and their holders.
//!
//! The frame source, the audio capture, and the video tick are opened in
//! phases when the first sink needs them and rolled back in reverse order,
//! either when a phase fails or when the last sink lets go.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use recaster_audio::{enumerate_input_devices, AudioBuffer, AudioCapture, AudioFormat};
use recaster_capture::{FrameGrabber, FrameSourceOpener, PreviewRenderer};
use recaster_ipc::{AudioSelection, CaptureMode, SessionConfig};

use crate::error::EngineError;
use crate::metrics::PerformanceMonitor;
use crate::tick::{TickSinks, VideoTick};
use crate::EngineResult;

/// A sink that can hold the capture resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    Recording,
    Streaming,
}

/// Phases of bringing capture up, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    OpenVideo,
    OpenAudio,
    StartTick,
}

impl CapturePhase {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::OpenVideo => Some(Self::OpenAudio),
            Self::OpenAudio => Some(Self::StartTick),
            Self::StartTick => None,
        }
    }

    pub fn previous(self) -> Option<Self> {
        match self {
            Self::OpenVideo => None,
            Self::OpenAudio => Some(Self::OpenVideo),
            Self::StartTick => Some(Self::OpenAudio),
        }
    }
}

/// What a sink needs to know about the held resources.
#[derive(Debug, Clone)]
pub struct CaptureInfo {
    /// Encoder-facing frame size (always even).
    pub frame_size: (u32, u32),

    /// Format of every live audio chunk.
    pub audio_format: AudioFormat,

    /// Buffer the live audio capture pushes into.
    pub audio_buffer: AudioBuffer,

    /// Whether the live audio is the silence generator.
    pub audio_is_silence: bool,
}

/// Resources opened on behalf of the active sinks.
#[derive(Default)]
pub struct CaptureResources {
    pub mode: Option<CaptureMode>,
    pub audio_selection: Option<AudioSelection>,
    pub grabber: Option<Box<dyn FrameGrabber>>,
    pub frame_size: Option<(u32, u32)>,
    pub audio: Option<AudioCapture>,
    pub tick: Option<VideoTick>,
}

/// Opens, shares, and releases capture resources.
pub struct ResourceManager {
    opener: Arc<dyn FrameSourceOpener>,
    resources: Mutex<CaptureResources>,
    current_phase: Mutex<Option<CapturePhase>>,
    holders: Mutex<Vec<Holder>>,
    sinks: Arc<TickSinks>,
    preview: PreviewRenderer,
    monitor: Arc<PerformanceMonitor>,
}

impl ResourceManager {
    /// Create a manager opening frame sources through `opener`.
    pub fn new(opener: Arc<dyn FrameSourceOpener>) -> Self {
        Self {
            opener,
            resources: Mutex::new(CaptureResources::default()),
            current_phase: Mutex::new(None),
            holders: Mutex::new(Vec::new()),
            sinks: Arc::new(TickSinks::default()),
            preview: PreviewRenderer::default(),
            monitor: Arc::new(PerformanceMonitor::default()),
        }
    }

    /// Take a hold on the capture resources, opening them if nobody holds them.
    ///
    /// Fails with [`EngineError::ResourceBusy`] if they are held for a
    /// different capture mode or audio input.
    #[instrument(name = "acquire_capture", skip(self, config))]
    pub fn acquire(&self, holder: Holder, config: &SessionConfig) -> EngineResult<()> {
        let mut holders = self.holders.lock();
        if holders.contains(&holder) {
            return Ok(());
        }

        if !holders.is_empty() {
            let resources = self.resources.lock();
            let same_mode = resources.mode.as_ref() == Some(&config.capture);
            let same_audio = resources.audio_selection == Some(config.audio);
            if !(same_mode && same_audio) {
                let held = resources.mode.as_ref().map_or("none", CaptureMode::name);
                return Err(EngineError::ResourceBusy(format!(
                    "capture is held in {held} mode by {:?}",
                    holders.as_slice()
                )));
            }
            debug!(?holder, "Sharing held capture resources");
            holders.push(holder);
            return Ok(());
        }

        if let Err(e) = self.initialize(config) {
            self.rollback();
            return Err(e);
        }
        holders.push(holder);
        Ok(())
    }

    /// Drop a hold. The last holder out releases everything.
    #[instrument(name = "release_capture", skip(self))]
    pub fn release(&self, holder: Holder) {
        let mut holders = self.holders.lock();
        holders.retain(|h| *h != holder);
        if holders.is_empty() {
            self.rollback();
        } else {
            debug!(remaining = ?holders.as_slice(), "Capture resources still held");
        }
    }

    fn initialize(&self, config: &SessionConfig) -> EngineResult<()> {
        let mut phase = CapturePhase::OpenVideo;

        loop {
            *self.current_phase.lock() = Some(phase);
            self.init_phase(config, phase)?;

            match phase.next() {
                Some(next) => phase = next,
                None => break,
            }
        }

        info!(mode = config.capture.name(), "Capture resources ready");
        Ok(())
    }

    fn init_phase(&self, config: &SessionConfig, phase: CapturePhase) -> EngineResult<()> {
        debug!("Initializing phase: {:?}", phase);

        match phase {
            CapturePhase::OpenVideo => self.open_video(&config.capture),
            CapturePhase::OpenAudio => self.open_audio(config.audio),
            CapturePhase::StartTick => self.start_tick(),
        }
    }

    fn open_video(&self, mode: &CaptureMode) -> EngineResult<()> {
        let grabber = self.opener.open(mode)?;
        let (width, height) = grabber.dimensions();
        let frame_size = (width - width % 2, height - height % 2);
        if frame_size.0 == 0 || frame_size.1 == 0 {
            return Err(EngineError::DeviceUnavailable(format!(
                "{} produced an unusable {width}x{height} frame",
                grabber.name()
            )));
        }

        let mut resources = self.resources.lock();
        resources.mode = Some(mode.clone());
        resources.frame_size = Some(frame_size);
        resources.grabber = Some(grabber);
        debug!(width = frame_size.0, height = frame_size.1, "Frame source opened");
        Ok(())
    }

    fn open_audio(&self, selection: AudioSelection) -> EngineResult<()> {
        let devices = enumerate_input_devices();
        let capture = AudioCapture::open(selection, &devices, AudioBuffer::default())?;

        let mut resources = self.resources.lock();
        resources.audio_selection = Some(selection);
        resources.audio = Some(capture);
        Ok(())
    }

    fn start_tick(&self) -> EngineResult<()> {
        let mut resources = self.resources.lock();
        let grabber = resources
            .grabber
            .take()
            .ok_or_else(|| EngineError::DeviceUnavailable("frame source not open".into()))?;
        let tick = VideoTick::start(
            grabber,
            Arc::clone(&self.sinks),
            self.preview.clone(),
            Arc::clone(&self.monitor),
        )?;
        resources.tick = Some(tick);
        Ok(())
    }

    /// Roll back from the current phase to nothing held.
    fn rollback(&self) {
        let current = self.current_phase.lock().take();

        if let Some(mut phase) = current {
            loop {
                debug!("Rolling back phase: {:?}", phase);
                self.rollback_phase(phase);

                match phase.previous() {
                    Some(prev) => phase = prev,
                    None => break,
                }
            }
            info!("Capture resources released");
        }
    }

    fn rollback_phase(&self, phase: CapturePhase) {
        let mut resources = self.resources.lock();

        match phase {
            CapturePhase::StartTick => {
                if let Some(mut tick) = resources.tick.take() {
                    tick.stop();
                }
            }
            CapturePhase::OpenAudio => {
                if let Some(mut audio) = resources.audio.take() {
                    audio.stop();
                }
                resources.audio_selection = None;
            }
            CapturePhase::OpenVideo => {
                resources.grabber = None;
                resources.frame_size = None;
                resources.mode = None;
                self.preview.clear();
            }
        }
    }

    /// Details of the held resources, if any.
    pub fn info(&self) -> Option<CaptureInfo> {
        let resources = self.resources.lock();
        let audio = resources.audio.as_ref()?;
        Some(CaptureInfo {
            frame_size: resources.frame_size?,
            audio_format: audio.format(),
            audio_buffer: audio.buffer().clone(),
            audio_is_silence: audio.is_silence(),
        })
    }

    /// Gate live audio into its buffer. Enabling discards anything stale first.
    pub fn set_audio_forwarding(&self, enabled: bool) {
        if let Some(audio) = self.resources.lock().audio.as_ref() {
            if enabled {
                audio.buffer().clear();
            }
            audio.set_forwarding(enabled);
        }
    }

    /// Whether the tick and its sources are running.
    pub fn is_held(&self) -> bool {
        self.resources.lock().tick.is_some()
    }

    /// Sinks currently holding the resources.
    pub fn holders(&self) -> Vec<Holder> {
        self.holders.lock().clone()
    }

    /// Capture mode of the held resources.
    pub fn mode(&self) -> Option<CaptureMode> {
        self.resources.lock().mode.clone()
    }

    /// Frames pulled by the tick since the resources were opened.
    pub fn tick_frames(&self) -> u64 {
        self.resources.lock().tick.as_ref().map_or(0, VideoTick::frames)
    }

    pub fn sinks(&self) -> &Arc<TickSinks> {
        &self.sinks
    }

    pub fn preview(&self) -> &PreviewRenderer {
        &self.preview
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Release everything regardless of holders.
    #[instrument(name = "shutdown_capture", skip(self))]
    pub fn shutdown(&self) {
        self.holders.lock().clear();
        self.rollback();
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use recaster_capture::{CaptureError, CaptureResult, VideoFrame};
    use recaster_ipc::CaptureRegion;

    struct Synthetic {
        width: u32,
        height: u32,
        sequence: u64,
    }

    impl FrameGrabber for Synthetic {
        fn next_frame(&mut self) -> CaptureResult<Option<VideoFrame>> {
            self.sequence += 1;
            let data = Bytes::from(vec![0u8; VideoFrame::bgr_buffer_size(self.width, self.height)]);
            Ok(Some(VideoFrame::new(data, self.width, self.height, self.sequence)))
        }

        fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn name(&self) -> &'static str {
            "synthetic"
        }
    }

    #[derive(Default)]
    struct CountingOpener {
        opened: AtomicUsize,
    }

    impl FrameSourceOpener for CountingOpener {
        fn open(&self, mode: &CaptureMode) -> CaptureResult<Box<dyn FrameGrabber>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            match mode {
                CaptureMode::Region(region) => Ok(Box::new(Synthetic {
                    width: region.width,
                    height: region.height,
                    sequence: 0,
                })),
                CaptureMode::Camera { index } => {
                    Err(CaptureError::DeviceUnavailable(format!("camera {index}")))
                }
                _ => Ok(Box::new(Synthetic {
                    width: 64,
                    height: 48,
                    sequence: 0,
                })),
            }
        }
    }

    fn silent(capture: CaptureMode) -> SessionConfig {
        SessionConfig {
            capture,
            audio: AudioSelection::Silence,
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(CapturePhase::OpenVideo.next(), Some(CapturePhase::OpenAudio));
        assert_eq!(CapturePhase::StartTick.next(), None);
        assert_eq!(CapturePhase::OpenAudio.previous(), Some(CapturePhase::OpenVideo));
    }

    #[test]
    fn test_shared_until_last_holder_releases() {
        let opener = Arc::new(CountingOpener::default());
        let manager = ResourceManager::new(opener.clone());
        let config = silent(CaptureMode::FullScreen);

        manager.acquire(Holder::Recording, &config).unwrap();
        manager.acquire(Holder::Streaming, &config).unwrap();
        assert_eq!(opener.opened.load(Ordering::SeqCst), 1);
        assert!(manager.is_held());

        manager.release(Holder::Recording);
        assert!(manager.is_held());
        manager.release(Holder::Streaming);
        assert!(!manager.is_held());
        assert!(manager.info().is_none());
        assert!(manager.preview().latest().is_none());
    }

    #[test]
    fn test_different_mode_is_busy() {
        let manager = ResourceManager::new(Arc::new(CountingOpener::default()));
        manager
            .acquire(Holder::Recording, &silent(CaptureMode::FullScreen))
            .unwrap();

        let region = CaptureMode::Region(CaptureRegion::new(0, 0, 200, 150));
        let result = manager.acquire(Holder::Streaming, &silent(region));
        assert!(matches!(result, Err(EngineError::ResourceBusy(_))));
        assert_eq!(manager.holders(), vec![Holder::Recording]);
        assert!(manager.is_held());
    }

    #[test]
    fn test_odd_region_is_cropped_to_even() {
        let manager = ResourceManager::new(Arc::new(CountingOpener::default()));
        let region = CaptureMode::Region(CaptureRegion::new(10, 10, 201, 151));
        manager.acquire(Holder::Streaming, &silent(region)).unwrap();

        let info = manager.info().unwrap();
        assert_eq!(info.frame_size, (200, 150));
        assert!(info.audio_is_silence);
        assert_eq!(info.audio_format, AudioFormat::SILENCE);
    }

    #[test]
    fn test_failed_open_leaves_nothing_held() {
        let manager = ResourceManager::new(Arc::new(CountingOpener::default()));
        let result = manager.acquire(Holder::Recording, &silent(CaptureMode::Camera { index: 7 }));
        assert!(matches!(result, Err(EngineError::DeviceUnavailable(_))));
        assert!(!manager.is_held());
        assert!(manager.holders().is_empty());
        assert!(manager.mode().is_none());
    }

    #[test]
    fn test_failed_audio_rolls_back_video() {
        let manager = ResourceManager::new(Arc::new(CountingOpener::default()));
        let config = SessionConfig {
            audio: AudioSelection::Device(99),
            ..Default::default()
        };
        assert!(manager.acquire(Holder::Streaming, &config).is_err());
        assert!(manager.mode().is_none());
        assert!(!manager.is_held());
    }

    #[test]
    fn test_forwarding_gate() {
        let manager = ResourceManager::new(Arc::new(CountingOpener::default()));
        manager
            .acquire(Holder::Recording, &silent(CaptureMode::FullScreen))
            .unwrap();
        let info = manager.info().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(80));
        assert!(info.audio_buffer.is_empty());

        manager.set_audio_forwarding(true);
        std::thread::sleep(std::time::Duration::from_millis(120));
        assert!(!info.audio_buffer.is_empty());

        manager.set_audio_forwarding(false);
        manager.release(Holder::Recording);
    }
}
