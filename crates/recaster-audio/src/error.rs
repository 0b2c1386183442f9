//! Error types for the audio module.

use thiserror::Error;

/// Errors that can occur during audio operations.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Audio device not found.
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Automatic selection found no loopback-style input.
    #[error(
        "No loopback input device found. Enable \"Stereo Mix\" or an equivalent \
         loopback device in the system sound settings"
    )]
    NoLoopbackDevice,

    /// The device exists but its stream could not be opened.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Device capture not compiled into this build.
    #[error("Audio capture not supported: {0}")]
    NotSupported(String),

    /// Audio format not supported.
    #[error("Audio format not supported: {0}")]
    FormatNotSupported(String),

    /// WAV reading or writing failed.
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker thread could not be started or exited during startup.
    #[error("Audio thread error: {0}")]
    Thread(String),
}
