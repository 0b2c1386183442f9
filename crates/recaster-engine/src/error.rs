//! Error types for the engine.

use recaster_audio::AudioError;
use recaster_capture::CaptureError;
use recaster_encoder::EncoderError;
use recaster_ipc::FailureKind;
use thiserror::Error;

/// Errors surfaced by start/stop operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A screen, camera, or audio device could not be opened.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The encoder failed to start or exited right away.
    #[error("Encoder launch failed: {0}")]
    EncoderLaunch(String),

    /// Writing frames to the encoder failed.
    #[error("Encoder pipe write failed: {0}")]
    PipeWrite(String),

    /// Merging the recording failed. The temporary files were kept.
    #[error("Merging recording failed: {0}")]
    Mux(String),

    /// Capture resources are held for a different mode.
    #[error("Capture resources busy: {0}")]
    ResourceBusy(String),

    /// The sink is already running.
    #[error("{0} is already active")]
    AlreadyActive(&'static str),

    /// The sink is not running.
    #[error("{0} is not active")]
    NotActive(&'static str),

    /// Writing the recording's audio file failed.
    #[error("Audio file error: {0}")]
    Wav(#[from] hound::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Operator-facing failure category.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::DeviceUnavailable(_) => FailureKind::DeviceUnavailable,
            Self::EncoderLaunch(_) => FailureKind::EncoderLaunchFailure,
            Self::PipeWrite(_) => FailureKind::PipeWriteFailure,
            Self::Mux(_) => FailureKind::MuxFailure,
            Self::ResourceBusy(_) => FailureKind::ResourceBusy,
            Self::AlreadyActive(_) | Self::NotActive(_) => FailureKind::InvalidRequest,
            Self::Wav(_) | Self::Io(_) => FailureKind::Io,
        }
    }
}

impl From<CaptureError> for EngineError {
    fn from(e: CaptureError) -> Self {
        Self::DeviceUnavailable(e.to_string())
    }
}

impl From<AudioError> for EngineError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::Io(io) => Self::Io(io),
            other => Self::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<EncoderError> for EngineError {
    fn from(e: EncoderError) -> Self {
        match e {
            EncoderError::NotFound(_)
            | EncoderError::Launch(_)
            | EncoderError::ExitedEarly { .. }
            | EncoderError::InvalidUrl(_) => Self::EncoderLaunch(e.to_string()),
            EncoderError::PipeWrite(_) | EncoderError::PipeClosed => Self::PipeWrite(e.to_string()),
            EncoderError::Mux(_) | EncoderError::Exited { .. } | EncoderError::Probe(_) => {
                Self::Mux(e.to_string())
            }
            EncoderError::InvalidInput(_) => Self::DeviceUnavailable(e.to_string()),
            EncoderError::Io(io) => Self::Io(io),
        }
    }
}
