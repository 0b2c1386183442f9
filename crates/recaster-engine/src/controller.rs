//! Start/stop control of the recording and streaming sinks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, instrument, warn};

use recaster_audio::enumerate_input_devices;
use recaster_capture::{FrameSourceOpener, PreviewRenderer};
use recaster_ipc::{
    AudioDeviceInfo, EngineEvent, EngineStatus, PerformanceReport, RecordingPhase, SessionConfig,
    StopReason, StreamingPhase, WarningType,
};

use crate::error::EngineError;
use crate::metrics::check_warnings;
use crate::recording::{RecordingOutcome, RecordingSession};
use crate::state::{Holder, ResourceManager};
use crate::streaming::StreamingSession;
use crate::EngineResult;

/// Owns the sessions and the shared capture resources.
///
/// Every operation either completes or leaves its sink idle with nothing
/// held on its behalf.
pub struct Controller {
    encoder: PathBuf,
    resources: ResourceManager,
    recording: Option<RecordingSession>,
    recording_phase: RecordingPhase,
    streaming: Option<StreamingSession>,
    streaming_phase: StreamingPhase,
    event_tx: Sender<EngineEvent>,
}

impl Controller {
    /// Create a controller using `encoder` unless a session config names another binary.
    pub fn new(
        encoder: PathBuf,
        opener: Arc<dyn FrameSourceOpener>,
        event_tx: Sender<EngineEvent>,
    ) -> Self {
        Self {
            encoder,
            resources: ResourceManager::new(opener),
            recording: None,
            recording_phase: RecordingPhase::Idle,
            streaming: None,
            streaming_phase: StreamingPhase::Idle,
            event_tx,
        }
    }

    fn encoder_for<'a>(&'a self, config: &'a SessionConfig) -> &'a Path {
        config.encoder_path.as_deref().unwrap_or(&self.encoder)
    }

    /// Start recording. Capture is opened if streaming has not already opened it.
    #[instrument(name = "start_recording", skip(self, config))]
    pub fn start_recording(&mut self, config: &SessionConfig) -> EngineResult<()> {
        if !self.recording_phase.is_idle() {
            return Err(EngineError::AlreadyActive("Recording"));
        }

        self.resources.acquire(Holder::Recording, config)?;
        let Some(info) = self.resources.info() else {
            self.resources.release(Holder::Recording);
            return Err(EngineError::DeviceUnavailable("capture resources missing".into()));
        };

        let encoder = self.encoder_for(config).to_path_buf();
        match RecordingSession::start(
            &encoder,
            config,
            &info,
            Arc::clone(&self.resources.sinks().recording),
        ) {
            Ok(session) => {
                self.resources.set_audio_forwarding(true);
                self.transition_recording(RecordingPhase::Recording {
                    video_path: session.video_path().to_path_buf(),
                    audio_path: session.audio_path().to_path_buf(),
                });
                self.recording = Some(session);
                Ok(())
            }
            Err(e) => {
                error!("Recording start failed: {}", e);
                self.resources.release(Holder::Recording);
                Err(e)
            }
        }
    }

    /// Stop recording and merge the deliverable.
    ///
    /// The recording sink ends idle whether or not the merge succeeds.
    #[instrument(name = "stop_recording", skip(self))]
    pub fn stop_recording(&mut self) -> EngineResult<RecordingOutcome> {
        let Some(session) = self.recording.take() else {
            return Err(EngineError::NotActive("Recording"));
        };

        self.transition_recording(RecordingPhase::Finalizing);
        self.resources.set_audio_forwarding(false);
        let result = session.finish();

        self.transition_recording(RecordingPhase::Idle);
        self.resources.release(Holder::Recording);
        result
    }

    /// Start streaming. Capture is opened if recording has not already opened it.
    #[instrument(name = "start_streaming", skip(self, config))]
    pub fn start_streaming(&mut self, config: &SessionConfig) -> EngineResult<()> {
        if !self.streaming_phase.is_idle() {
            return Err(EngineError::AlreadyActive("Streaming"));
        }

        self.transition_streaming(StreamingPhase::Starting);
        if let Err(e) = self.resources.acquire(Holder::Streaming, config) {
            self.transition_streaming(StreamingPhase::Idle);
            return Err(e);
        }

        let frame_size = self.resources.info().map(|info| info.frame_size).unwrap_or((0, 0));
        let encoder = self.encoder_for(config).to_path_buf();
        match StreamingSession::start(
            &encoder,
            config,
            frame_size,
            Arc::clone(&self.resources.sinks().streaming),
        ) {
            Ok(session) => {
                self.resources.monitor().reset();
                let (width, height) = session.dimensions();
                self.transition_streaming(StreamingPhase::Streaming {
                    url: session.url().to_string(),
                    width,
                    height,
                    fps: session.fps(),
                });
                self.streaming = Some(session);
                Ok(())
            }
            Err(e) => {
                error!("Streaming start failed: {}", e);
                self.resources.release(Holder::Streaming);
                self.transition_streaming(StreamingPhase::Idle);
                Err(e)
            }
        }
    }

    /// Stop streaming. Returns the encoder's exit code.
    ///
    /// A stream whose encoder already exited is reported as stopped for that reason.
    #[instrument(name = "stop_streaming", skip(self))]
    pub fn stop_streaming(&mut self, reason: StopReason) -> EngineResult<Option<i32>> {
        let Some(session) = self.streaming.take() else {
            return Err(EngineError::NotActive("Streaming"));
        };

        let reason = match (reason, session.exit_code()) {
            (StopReason::UserRequested, Some(code)) => StopReason::EncoderExited { code },
            (reason, _) => reason,
        };
        info!(reason = %reason.message(), "Stopping stream");

        self.transition_streaming(StreamingPhase::Stopping { reason });
        let code = session.stop();

        self.transition_streaming(StreamingPhase::Idle);
        self.resources.release(Holder::Streaming);
        Ok(code)
    }

    /// Report an encoder that exited while streaming. Returns the failure once.
    pub fn poll_stream_health(&mut self) -> Option<EngineError> {
        self.streaming.as_mut()?.check_health()
    }

    /// Sample streaming performance. `None` when not streaming.
    pub fn sample_performance(&self) -> Option<(PerformanceReport, Vec<WarningType>)> {
        let session = self.streaming.as_ref()?;
        let report = self.resources.monitor().sample(Some(session.pid()));
        let warnings = check_warnings(&report);
        Some((report, warnings))
    }

    /// Stop streaming, then recording, then release capture.
    ///
    /// Returns the recording outcome if a recording was active.
    #[instrument(name = "controller_shutdown", skip(self))]
    pub fn shutdown(&mut self) -> Option<EngineResult<RecordingOutcome>> {
        if self.streaming.is_some() {
            if let Err(e) = self.stop_streaming(StopReason::Shutdown) {
                warn!("Stopping stream during shutdown failed: {}", e);
            }
        }
        let outcome = self.recording.is_some().then(|| self.stop_recording());
        self.resources.shutdown();
        outcome
    }

    /// Current state of both sinks.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            recording: self.recording_phase.clone(),
            streaming: self.streaming_phase.clone(),
            capture_held: self.resources.is_held(),
            recording_elapsed_secs: self.recording.as_ref().map(|s| s.elapsed().as_secs()),
        }
    }

    /// Input devices, headed by the silence sentinel.
    pub fn audio_devices(&self) -> Vec<AudioDeviceInfo> {
        enumerate_input_devices()
    }

    /// The preview slot the UI polls.
    pub fn preview(&self) -> PreviewRenderer {
        self.resources.preview().clone()
    }

    /// Frames pulled by the video tick since capture was opened.
    pub fn tick_frames(&self) -> u64 {
        self.resources.tick_frames()
    }

    pub fn recording_session(&self) -> Option<&RecordingSession> {
        self.recording.as_ref()
    }

    pub fn streaming_session(&self) -> Option<&StreamingSession> {
        self.streaming.as_ref()
    }

    fn transition_recording(&mut self, next: RecordingPhase) {
        let previous = std::mem::replace(&mut self.recording_phase, next.clone());
        debug!(previous = previous.name(), current = next.name(), "Recording transition");
        self.send_event(EngineEvent::RecordingChanged {
            previous,
            current: next,
        });
    }

    fn transition_streaming(&mut self, next: StreamingPhase) {
        let previous = std::mem::replace(&mut self.streaming_phase, next.clone());
        debug!(previous = previous.name(), current = next.name(), "Streaming transition");
        self.send_event(EngineEvent::StreamingChanged {
            previous,
            current: next,
        });
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.recording.is_some() || self.streaming.is_some() {
            let _ = self.shutdown();
        }
    }
}
