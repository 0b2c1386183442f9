//! Sink state machine types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Phase of the recording sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum RecordingPhase {
    /// Not recording.
    #[default]
    Idle,

    /// Frames and audio are being written to temporary files.
    Recording {
        /// Temporary video file.
        video_path: PathBuf,

        /// Temporary audio file.
        audio_path: PathBuf,
    },

    /// Writers are closing and the muxer is producing the deliverable.
    Finalizing,
}

impl RecordingPhase {
    /// Returns true if idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true while frames are being written.
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }

    /// Returns true while finalizing.
    pub fn is_finalizing(&self) -> bool {
        matches!(self, Self::Finalizing)
    }

    /// Returns a simple string representation of the phase.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Recording { .. } => "Recording",
            Self::Finalizing => "Finalizing",
        }
    }
}

/// Phase of the streaming sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum StreamingPhase {
    /// Not streaming.
    #[default]
    Idle,

    /// Resolving dimensions and launching the encoder.
    Starting,

    /// Encoder is running and receiving frames.
    Streaming {
        /// Target URL.
        url: String,

        /// Encoder-facing width (always even).
        width: u32,

        /// Encoder-facing height (always even).
        height: u32,

        /// Frames per second fed to the encoder.
        fps: u32,
    },

    /// Closing the pipe and terminating the encoder.
    Stopping {
        /// Why the stream is stopping.
        reason: StopReason,
    },
}

impl StreamingPhase {
    /// Returns true if idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the encoder is live.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    /// Returns true while starting.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting)
    }

    /// Returns true while stopping.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// Returns a simple string representation of the phase.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting => "Starting",
            Self::Streaming { .. } => "Streaming",
            Self::Stopping { .. } => "Stopping",
        }
    }
}

/// Reason for stopping the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StopReason {
    /// Operator requested stop.
    UserRequested,

    /// The encoder process exited on its own.
    EncoderExited { code: Option<i32> },

    /// Engine is shutting down.
    Shutdown,
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Stream stopped by operator".to_string(),
            Self::EncoderExited { code: Some(code) } => {
                format!("Encoder exited with status {code}")
            }
            Self::EncoderExited { code: None } => "Encoder terminated by signal".to_string(),
            Self::Shutdown => "Engine shutting down".to_string(),
        }
    }
}

/// Snapshot of both sinks and the shared capture resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Recording sink phase.
    pub recording: RecordingPhase,

    /// Streaming sink phase.
    pub streaming: StreamingPhase,

    /// Whether the frame source and audio capture are currently held.
    pub capture_held: bool,

    /// Elapsed recording time in whole seconds.
    pub recording_elapsed_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names() {
        assert_eq!(RecordingPhase::Finalizing.name(), "Finalizing");
        assert_eq!(StreamingPhase::Starting.name(), "Starting");
        assert!(StreamingPhase::default().is_idle());
    }

    #[test]
    fn test_stop_reason_message() {
        let reason = StopReason::EncoderExited { code: Some(1) };
        assert_eq!(reason.message(), "Encoder exited with status 1");
    }
}
