//! Streaming sink.

use std::path::Path;
use std::time::{Duration, Instant};

use recaster_capture::VideoFrame;
use recaster_encoder::{
    validate_stream_url, Diagnostic, EncoderProcess, EncoderProgress, StreamCommand, LAUNCH_GRACE,
};
use recaster_ipc::SessionConfig;
use tracing::{error, info, instrument, warn};

use crate::error::EngineError;
use crate::tick::SinkSlot;
use crate::EngineResult;

/// Time allowed for the encoder to flush after its input closes.
const STOP_GRACE: Duration = Duration::from_secs(3);

/// Minimum spacing of pipe failure log lines.
const PIPE_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// The stream encoder as seen by the video tick.
pub struct StreamFeed {
    process: EncoderProcess,
    width: u32,
    height: u32,
    frames_written: u64,
    write_failures: u64,
    last_failure_log: Option<Instant>,
}

impl StreamFeed {
    fn new(process: EncoderProcess, width: u32, height: u32) -> Self {
        Self {
            process,
            width,
            height,
            frames_written: 0,
            write_failures: 0,
            last_failure_log: None,
        }
    }

    /// Queue one frame without blocking. Failures are counted and logged, never returned.
    pub fn write_frame(&mut self, frame: &VideoFrame) {
        let frame = frame.cropped(self.width, self.height);
        match self.process.send(frame.data) {
            Ok(()) => self.frames_written += 1,
            Err(e) => {
                self.write_failures += 1;
                let due = self
                    .last_failure_log
                    .map_or(true, |at| at.elapsed() >= PIPE_LOG_INTERVAL);
                if due {
                    warn!(failures = self.write_failures, "Stream pipe write failed: {}", e);
                    self.last_failure_log = Some(Instant::now());
                }
            }
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    /// Frames dropped because the encoder fell behind.
    pub fn frames_dropped(&self) -> u64 {
        self.process.input_counts().1
    }
}

/// A running stream: the encoder process plus its negotiated parameters.
pub struct StreamingSession {
    url: String,
    width: u32,
    height: u32,
    fps: u32,
    pid: u32,
    started_at: Instant,
    feed: SinkSlot<StreamFeed>,
    exit_reported: bool,
}

impl StreamingSession {
    /// Launch the encoder and install it as the tick's streaming sink.
    #[instrument(name = "streaming_start", skip(binary, config, slot))]
    pub fn start(
        binary: &Path,
        config: &SessionConfig,
        frame_size: (u32, u32),
        slot: SinkSlot<StreamFeed>,
    ) -> EngineResult<Self> {
        let (width, height) = frame_size;
        if width == 0 || height == 0 {
            return Err(EngineError::EncoderLaunch(format!(
                "cannot stream a {width}x{height} frame"
            )));
        }
        let url = config.resolved_stream_url();
        validate_stream_url(&url)?;

        let mut config = config.clone();
        if let Some(track) = config.background_track.as_deref() {
            if !track.is_file() {
                warn!(path = %track.display(), "Background track not found, streaming without it");
                config.background_track = None;
            }
        }

        let command = StreamCommand::from_config(width, height, &config);
        let mut process = EncoderProcess::spawn("stream", binary, &command.build())?;
        process.check_launch(LAUNCH_GRACE)?;
        let pid = process.pid();

        *slot.lock() = Some(StreamFeed::new(process, width, height));

        info!(url = %url, width, height, fps = command.fps(), "Streaming started");
        Ok(Self {
            url,
            width,
            height,
            fps: command.fps(),
            pid,
            started_at: Instant::now(),
            feed: slot,
            exit_reported: false,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Encoder-facing frame size.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Encoder process id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Latest progress line from the encoder.
    pub fn progress(&self) -> Option<EncoderProgress> {
        self.feed.lock().as_ref().and_then(|feed| feed.process.progress())
    }

    /// Recent classified encoder diagnostics.
    pub fn recent_diagnostics(&self) -> Vec<Diagnostic> {
        self.feed
            .lock()
            .as_ref()
            .map(|feed| feed.process.recent_diagnostics())
            .unwrap_or_default()
    }

    /// Exit code if the encoder has exited on its own.
    pub fn exit_code(&self) -> Option<Option<i32>> {
        self.feed.lock().as_mut().and_then(|feed| feed.process.exit_code())
    }

    /// Report an unexpected encoder exit, once.
    ///
    /// The session stays installed; frames keep failing until the operator stops it.
    pub fn check_health(&mut self) -> Option<EngineError> {
        if self.exit_reported {
            return None;
        }
        let mut guard = self.feed.lock();
        let feed = guard.as_mut()?;
        let code = feed.process.exit_code()?;
        self.exit_reported = true;

        let detail = feed.process.failure_detail();
        error!(?code, detail = %detail, "Stream encoder exited");
        Some(EngineError::PipeWrite(format!(
            "encoder exited with code {code:?}: {detail}"
        )))
    }

    /// Close the pipe and wait for the encoder to exit.
    #[instrument(name = "streaming_stop", skip(self), fields(url = %self.url))]
    pub fn stop(self) -> Option<i32> {
        let Some(mut feed) = self.feed.lock().take() else {
            return None;
        };
        let code = feed.process.shutdown(STOP_GRACE);
        info!(
            ?code,
            frames = feed.frames_written,
            failures = feed.write_failures,
            dropped = feed.frames_dropped(),
            uptime_secs = self.started_at.elapsed().as_secs(),
            "Streaming stopped"
        );
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use recaster_ipc::FailureKind;

    fn empty_slot() -> SinkSlot<StreamFeed> {
        Arc::new(Mutex::new(None))
    }

    #[test]
    fn test_unreachable_encoder_fails_launch() {
        let slot = empty_slot();
        let result = StreamingSession::start(
            Path::new("/definitely/not/ffmpeg"),
            &SessionConfig::default(),
            (640, 480),
            Arc::clone(&slot),
        );
        match result {
            Err(e) => assert_eq!(e.kind(), FailureKind::EncoderLaunchFailure),
            Ok(_) => panic!("launch should fail"),
        }
        assert!(slot.lock().is_none());
    }

    #[test]
    fn test_invalid_url_fails_launch() {
        let config = SessionConfig {
            stream_url: "not a url".to_string(),
            ..Default::default()
        };
        let result = StreamingSession::start(Path::new("ffmpeg"), &config, (640, 480), empty_slot());
        assert!(matches!(result, Err(EngineError::EncoderLaunch(_))));
    }

    #[test]
    fn test_zero_size_fails_launch() {
        let result = StreamingSession::start(
            Path::new("ffmpeg"),
            &SessionConfig::default(),
            (0, 480),
            empty_slot(),
        );
        assert!(matches!(result, Err(EngineError::EncoderLaunch(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_early_exit_is_launch_failure() {
        // `false` ignores its arguments and exits 1 immediately.
        let slot = empty_slot();
        let result = StreamingSession::start(
            Path::new("/bin/false"),
            &SessionConfig::default(),
            (640, 480),
            Arc::clone(&slot),
        );
        assert!(matches!(result, Err(EngineError::EncoderLaunch(_))));
        assert!(slot.lock().is_none());
    }
}
